//! Artifact store: a durable record of every phase's raw output.
//!
//! A SQLite ledger indexes runs and artifacts; payload bytes live in a
//! content-addressed blob directory keyed by hash prefix. Identical payloads
//! share one blob under many index rows. Payloads are immutable once
//! stored; only summaries are (re)generated.

pub mod summarize;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::protocol::SummaryTier;

/// Runs older than this with no terminal transition are swept to timed_out.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(3600);

static HEX_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
        }
    }

    pub fn parse(value: &str) -> RunStatus {
        match value {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "timed_out" => RunStatus::TimedOut,
            _ => RunStatus::Running,
        }
    }

    /// A run is terminal once it leaves `running`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Draft,
    Critique,
    Synthesis,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Draft => "draft",
            Phase::Critique => "critique",
            Phase::Synthesis => "synthesis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub subagent: String,
    pub mode: Option<String>,
    pub task_hash: String,
    pub status: RunStatus,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub run_id: String,
    pub phase: Phase,
    pub producer: String,
    pub content_hash: String,
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub summary_tier: Option<SummaryTier>,
}

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    artifact_id: String,
    run_id: String,
    phase: String,
    producer: String,
    content_hash: String,
    byte_size: i64,
    created_at: String,
    summary: Option<String>,
    summary_tier: Option<String>,
}

impl ArtifactRow {
    fn into_record(self) -> Result<ArtifactRecord> {
        let phase = match self.phase.as_str() {
            "draft" => Phase::Draft,
            "critique" => Phase::Critique,
            "synthesis" => Phase::Synthesis,
            other => return Err(anyhow!("unknown artifact phase '{}'", other)),
        };
        let summary_tier = match self.summary_tier.as_deref() {
            None => None,
            Some("gist") => Some(SummaryTier::Gist),
            Some("findings") => Some(SummaryTier::Findings),
            Some("actions") => Some(SummaryTier::Actions),
            Some("rationale") => Some(SummaryTier::Rationale),
            Some("audit") => Some(SummaryTier::Audit),
            Some(other) => return Err(anyhow!("unknown summary tier '{}'", other)),
        };
        Ok(ArtifactRecord {
            artifact_id: self.artifact_id,
            run_id: self.run_id,
            phase,
            producer: self.producer,
            content_hash: self.content_hash,
            byte_size: self.byte_size as u64,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc),
            summary: self.summary,
            summary_tier,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_id: String,
    subagent: String,
    mode: Option<String>,
    task_hash: String,
    status: String,
    failure: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord> {
        Ok(RunRecord {
            run_id: self.run_id,
            subagent: self.subagent,
            mode: self.mode,
            task_hash: self.task_hash,
            status: RunStatus::parse(&self.status),
            failure: self.failure,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&self.updated_at)?.with_timezone(&Utc),
            completed_at: self
                .completed_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}

pub struct ArtifactStore {
    root: PathBuf,
    pool: SqlitePool,
    /// Serializes ledger writes for a run. Blob writes are idempotent and
    /// may race safely outside this lock.
    write_lock: tokio::sync::Mutex<()>,
}

impl ArtifactStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("blobs"))
            .await
            .with_context(|| format!("creating artifact root {}", root.display()))?;

        let db_path = root.join("ledger.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = ArtifactStore {
            root,
            pool,
            write_lock: tokio::sync::Mutex::new(()),
        };
        store.create_tables().await?;
        store.sweep_stale_runs(DEFAULT_STALE_THRESHOLD).await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                subagent TEXT NOT NULL,
                mode TEXT,
                task_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                failure TEXT,
                timings TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                producer TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                summary TEXT,
                summary_tier TEXT,
                FOREIGN KEY (run_id) REFERENCES runs(run_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_run ON artifacts(run_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_hash ON artifacts(content_hash)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn content_hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Blob paths are derived from the hash only; a malformed hash is the
    /// single way a path could escape the store root, so it is rejected
    /// before any path is built.
    fn blob_path(&self, hash: &str) -> Result<PathBuf> {
        if !HEX_HASH.is_match(hash) {
            return Err(anyhow!("invalid content hash '{}'", hash));
        }
        let path = self.root.join("blobs").join(&hash[..2]).join(hash);
        self.ensure_contained(&path)?;
        Ok(path)
    }

    fn ensure_contained(&self, path: &Path) -> Result<()> {
        if !path.starts_with(&self.root) {
            return Err(anyhow!(
                "path escapes artifact root: {}",
                path.display()
            ));
        }
        Ok(())
    }

    pub async fn create_run(
        &self,
        subagent: &str,
        mode: Option<&str>,
        task: &str,
    ) -> Result<RunRecord> {
        let now = Utc::now();
        let record = RunRecord {
            run_id: Uuid::new_v4().to_string(),
            subagent: subagent.to_string(),
            mode: mode.map(str::to_string),
            task_hash: Self::content_hash(task),
            status: RunStatus::Running,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO runs (run_id, subagent, mode, task_hash, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_id)
        .bind(&record.subagent)
        .bind(&record.mode)
        .bind(&record.task_hash)
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    /// Store one phase output, deduplicating by content.
    ///
    /// The same (run, phase, producer, hash) returns the existing row; the
    /// same bytes under a different key share the blob but get a new row.
    pub async fn store_artifact(
        &self,
        run_id: &str,
        phase: Phase,
        producer: &str,
        content: &str,
    ) -> Result<ArtifactRecord> {
        let hash = Self::content_hash(content);
        let _guard = self.write_lock.lock().await;

        let existing: Option<ArtifactRow> = sqlx::query_as(
            r#"
            SELECT * FROM artifacts
            WHERE run_id = ? AND phase = ? AND producer = ? AND content_hash = ?
            "#,
        )
        .bind(run_id)
        .bind(phase.as_str())
        .bind(producer)
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return row.into_record();
        }

        self.write_blob(&hash, content).await?;

        let record = ArtifactRecord {
            artifact_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            phase,
            producer: producer.to_string(),
            content_hash: hash,
            byte_size: content.len() as u64,
            created_at: Utc::now(),
            summary: None,
            summary_tier: None,
        };

        sqlx::query(
            r#"
            INSERT INTO artifacts (artifact_id, run_id, phase, producer, content_hash,
                                   byte_size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.artifact_id)
        .bind(&record.run_id)
        .bind(record.phase.as_str())
        .bind(&record.producer)
        .bind(&record.content_hash)
        .bind(record.byte_size as i64)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE runs SET updated_at = ? WHERE run_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        Ok(record)
    }

    /// Content-addressed blob write: atomic via tmp+rename, idempotent
    /// because the destination name is the hash.
    async fn write_blob(&self, hash: &str, content: &str) -> Result<()> {
        let path = self.blob_path(hash)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let parent = path.parent().expect("blob path has a parent");
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, content).await?;
        match tokio::fs::rename(&tmp, &path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                // A concurrent writer landing first is success.
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    Ok(())
                } else {
                    Err(err.into())
                }
            }
        }
    }

    pub async fn artifact_content(&self, artifact_id: &str) -> Result<Option<String>> {
        let row: Option<ArtifactRow> =
            sqlx::query_as("SELECT * FROM artifacts WHERE artifact_id = ?")
                .bind(artifact_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let path = self.blob_path(&row.content_hash)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Tiered summary of an artifact, generated lazily and cached in the
    /// ledger. The audit tier always returns the full payload uncached.
    pub async fn summary(&self, artifact_id: &str, tier: SummaryTier) -> Result<String> {
        let content = self
            .artifact_content(artifact_id)
            .await?
            .ok_or_else(|| anyhow!("artifact not found: {}", artifact_id))?;

        if tier == SummaryTier::Audit {
            return Ok(content);
        }

        let row: Option<ArtifactRow> =
            sqlx::query_as("SELECT * FROM artifacts WHERE artifact_id = ?")
                .bind(artifact_id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(row) = row {
            if row.summary_tier.as_deref() == Some(tier.as_str()) {
                if let Some(summary) = row.summary {
                    return Ok(summary);
                }
            }
        }

        let summary = summarize::summarize(&content, tier);

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "UPDATE artifacts SET summary = ?, summary_tier = ? WHERE artifact_id = ?",
        )
        .bind(&summary)
        .bind(tier.as_str())
        .bind(artifact_id)
        .execute(&self.pool)
        .await?;

        Ok(summary)
    }

    pub async fn run_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        let rows: Vec<ArtifactRow> =
            sqlx::query_as("SELECT * FROM artifacts WHERE run_id = ? ORDER BY created_at")
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|r| r.into_record()).collect()
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.into_record()).transpose()
    }

    pub async fn complete_run(
        &self,
        run_id: &str,
        status: RunStatus,
        failure: Option<&str>,
        timings_json: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, failure = ?, timings = ?, updated_at = ?, completed_at = ?
            WHERE run_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(failure)
        .bind(timings_json)
        .bind(&now)
        .bind(&now)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition runs stuck in `running` past the threshold to
    /// `timed_out`, recording an explicit failure.
    pub async fn sweep_stale_runs(&self, threshold: Duration) -> Result<u32> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(threshold).unwrap_or_else(|_| ChronoDuration::hours(1));
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'timed_out',
                failure = 'stale run swept: no terminal transition before threshold',
                updated_at = ?, completed_at = ?
            WHERE status = 'running' AND updated_at < ?
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let swept = result.rows_affected() as u32;
        if swept > 0 {
            tracing::info!("swept {} stale run(s) to timed_out", swept);
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn blob_count(root: &Path) -> usize {
        let mut count = 0;
        for prefix in std::fs::read_dir(root.join("blobs")).unwrap().flatten() {
            if prefix.path().is_dir() {
                count += std::fs::read_dir(prefix.path()).unwrap().count();
            }
        }
        count
    }

    #[tokio::test]
    async fn test_store_and_read_artifact() {
        let (_dir, store) = open_store().await;
        let run = store.create_run("drafter", Some("impl"), "task").await.unwrap();

        let artifact = store
            .store_artifact(&run.run_id, Phase::Draft, "openai", "draft body")
            .await
            .unwrap();

        let content = store.artifact_content(&artifact.artifact_id).await.unwrap();
        assert_eq!(content.as_deref(), Some("draft body"));
        assert_eq!(artifact.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_same_key_same_content_dedups_to_one_row() {
        let (_dir, store) = open_store().await;
        let run = store.create_run("drafter", None, "task").await.unwrap();

        let first = store
            .store_artifact(&run.run_id, Phase::Draft, "openai", "same")
            .await
            .unwrap();
        let second = store
            .store_artifact(&run.run_id, Phase::Draft, "openai", "same")
            .await
            .unwrap();

        assert_eq!(first.artifact_id, second.artifact_id);
        assert_eq!(store.run_artifacts(&run.run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_bytes_share_one_blob_many_rows() {
        let (dir, store) = open_store().await;
        let run = store.create_run("drafter", None, "task").await.unwrap();

        store
            .store_artifact(&run.run_id, Phase::Draft, "openai", "identical")
            .await
            .unwrap();
        store
            .store_artifact(&run.run_id, Phase::Draft, "anthropic", "identical")
            .await
            .unwrap();

        assert_eq!(store.run_artifacts(&run.run_id).await.unwrap().len(), 2);
        assert_eq!(blob_count(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_complete_run_is_terminal() {
        let (_dir, store) = open_store().await;
        let run = store.create_run("planner", None, "task").await.unwrap();
        assert!(!run.status.is_terminal());

        store
            .complete_run(&run.run_id, RunStatus::Completed, None, None)
            .await
            .unwrap();

        let loaded = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert!(loaded.status.is_terminal());
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_sweep_transitions_stale_runs() {
        let (_dir, store) = open_store().await;
        let run = store.create_run("drafter", None, "task").await.unwrap();

        // Fresh run survives a sweep with a generous threshold.
        store.sweep_stale_runs(Duration::from_secs(3600)).await.unwrap();
        let loaded = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);

        // Zero threshold catches it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let swept = store.sweep_stale_runs(Duration::ZERO).await.unwrap();
        assert_eq!(swept, 1);

        let loaded = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::TimedOut);
        assert!(loaded.failure.is_some());
    }

    #[tokio::test]
    async fn test_summary_cached_per_tier() {
        let (_dir, store) = open_store().await;
        let run = store.create_run("drafter", None, "task").await.unwrap();

        let mut content = String::new();
        for i in 0..100 {
            content.push_str(&format!("- finding number {} with enough detail to matter\n", i));
        }
        let artifact = store
            .store_artifact(&run.run_id, Phase::Draft, "openai", &content)
            .await
            .unwrap();

        let summary = store
            .summary(&artifact.artifact_id, SummaryTier::Findings)
            .await
            .unwrap();
        assert!(summary.len() < content.len());

        let rows = store.run_artifacts(&run.run_id).await.unwrap();
        assert_eq!(rows[0].summary_tier, Some(SummaryTier::Findings));
        assert_eq!(rows[0].summary.as_deref(), Some(summary.as_str()));

        // Audit always returns the full payload.
        let audit = store
            .summary(&artifact.artifact_id, SummaryTier::Audit)
            .await
            .unwrap();
        assert_eq!(audit, content);
    }

    #[tokio::test]
    async fn test_invalid_hash_rejected() {
        let (_dir, store) = open_store().await;
        assert!(store.blob_path("../../etc/passwd").is_err());
        assert!(store.blob_path("ABCD").is_err());
    }
}
