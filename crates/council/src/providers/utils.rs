use serde_json::Value;

/// Date suffixes providers append to pinned model ids.
const DATE_SUFFIXES: &[&str] = &["-2024", "-2025", "-2026"];

/// Match a model id against a capability family.
///
/// Uses exact membership, prefix matching, and date-suffix stripping so
/// pinned ids like `gpt-4o-2024-08-06` resolve to their base model.
pub fn model_in_family(model: &str, exact: &[&str], prefixes: &[&str]) -> bool {
    if exact.contains(&model) {
        return true;
    }
    if prefixes.iter().any(|p| model.starts_with(p)) {
        return true;
    }
    for suffix in DATE_SUFFIXES {
        if let Some(idx) = model.find(suffix) {
            return exact.contains(&&model[..idx]);
        }
    }
    false
}

/// Extract the resolved model id from a provider response body.
pub fn get_model(response: &Value) -> Option<String> {
    response
        .get("model")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

pub fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
