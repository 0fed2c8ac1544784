//! Heuristic tiered summarization.
//!
//! Summaries are extracted, not generated: bullet points become findings,
//! imperative phrases become actions, "because ..." clauses become
//! rationale. The audit tier is always the full payload.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::SummaryTier;

/// 4 chars per token is the estimate the ledger uses throughout.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

static GIST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)summary[:\s]+(.+?)[\n.]",
        r"(?i)in summary[,:\s]+(.+?)[\n.]",
        r"(?i)conclusion[:\s]+(.+?)[\n.]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid pattern"))
    .collect()
});

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*•]\s*(.+)$").expect("valid pattern"));
static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s*(.+)$").expect("valid pattern"));
static ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:should|must|need to|recommend|suggest)\s+(.+?)[\n.]")
        .expect("valid pattern")
});
static REASON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:because|the reason is|reason[:\s])\s*(.+?)[\n.]").expect("valid pattern")
});

/// Summarize content to a tier's budget. Content already under budget is
/// returned unchanged.
pub fn summarize(content: &str, tier: SummaryTier) -> String {
    if estimate_tokens(content) <= tier.token_limit() {
        return content.to_string();
    }

    let char_limit = tier.char_limit();
    match tier {
        SummaryTier::Gist => extract_gist(content, char_limit),
        SummaryTier::Findings => extract_findings(content, char_limit),
        SummaryTier::Actions => extract_actions(content, char_limit),
        SummaryTier::Rationale => extract_rationale(content, char_limit),
        SummaryTier::Audit => content.to_string(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn extract_gist(content: &str, char_limit: usize) -> String {
    for pattern in GIST_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(content) {
            let gist = captures[1].trim().to_string();
            if gist.len() <= char_limit {
                return gist;
            }
        }
    }

    // Fall back to the first meaningful line.
    if let Some(line) = content
        .lines()
        .map(str::trim)
        .find(|line| line.len() > 10)
    {
        return truncate(line, char_limit);
    }
    truncate(content, char_limit)
}

fn extract_findings(content: &str, char_limit: usize) -> String {
    let mut findings: Vec<String> = Vec::new();
    for pattern in [&*BULLET, &*NUMBERED] {
        for captures in pattern.captures_iter(content) {
            let finding = captures[1].trim();
            if finding.len() > 10 {
                findings.push(format!("- {}", truncate(finding, 100)));
            }
        }
    }

    if !findings.is_empty() {
        findings.truncate(5);
        let result = format!("Key findings:\n{}", findings.join("\n"));
        return truncate(&result, char_limit);
    }

    // Fall back to the first paragraph.
    let first = content.split("\n\n").next().unwrap_or(content);
    truncate(first, char_limit)
}

fn extract_actions(content: &str, char_limit: usize) -> String {
    let findings = extract_findings(content, char_limit / 2);

    let actions: Vec<String> = ACTION
        .captures_iter(content)
        .filter(|c| c[1].trim().len() > 10)
        .take(3)
        .map(|c| format!("- {}", truncate(c[1].trim(), 80)))
        .collect();

    let result = if actions.is_empty() {
        findings
    } else {
        format!("{}\n\nActions:\n{}", findings, actions.join("\n"))
    };
    truncate(&result, char_limit)
}

fn extract_rationale(content: &str, char_limit: usize) -> String {
    let actions = extract_actions(content, char_limit / 2);

    let reasons: Vec<String> = REASON
        .captures_iter(content)
        .filter(|c| c[1].trim().len() > 20)
        .take(3)
        .map(|c| format!("- {}", truncate(c[1].trim(), 150)))
        .collect();

    let result = if reasons.is_empty() {
        actions
    } else {
        format!("{}\n\nRationale:\n{}", actions, reasons.join("\n"))
    };
    truncate(&result, char_limit)
}
