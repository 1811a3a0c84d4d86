//! Listener submissions with embeddings, and nearest-neighbour lookup.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RadioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Text,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: SubmissionKind,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// One similar submission, as returned to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub similarity: f32,
}

/// Persistence contract for submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Reachability check backing `/health`.
    async fn ping(&self) -> Result<()>;

    async fn save(&self, submission: &Submission) -> Result<()>;

    /// Up to `limit` stored submissions ordered by descending cosine
    /// similarity to `embedding`.
    async fn nearest(&self, embedding: &[f32], limit: usize) -> Result<Vec<Recommendation>>;
}

/// Cosine similarity in `[-1, 1]`. Mismatched lengths or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// File-backed store: one JSON submission per line in
/// `<base>/submissions.jsonl`.
pub struct JsonlSubmissionStore {
    base: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSubmissionStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            write_lock: Mutex::new(()),
        }
    }

    fn file_path(&self) -> PathBuf {
        self.base.join("submissions.jsonl")
    }

    async fn load_all(&self) -> Result<Vec<Submission>> {
        let path = self.file_path();
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut out = Vec::new();
        for (n, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Submission>(line) {
                Ok(sub) => out.push(sub),
                Err(e) => warn!(line = n + 1, %e, "Skipping corrupt submission line"),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SubmissionStore for JsonlSubmissionStore {
    async fn ping(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let meta = tokio::fs::metadata(&self.base).await?;
        if meta.permissions().readonly() {
            return Err(RadioError::Store(format!(
                "{} is read-only",
                self.base.display()
            )));
        }
        Ok(())
    }

    async fn save(&self, submission: &Submission) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.base).await?;
        let mut line = serde_json::to_string(submission)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(id = %submission.id, "Saved submission");
        Ok(())
    }

    async fn nearest(&self, embedding: &[f32], limit: usize) -> Result<Vec<Recommendation>> {
        let mut scored: Vec<Recommendation> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| !s.embedding.is_empty())
            .map(|s| Recommendation {
                similarity: cosine_similarity(embedding, &s.embedding),
                id: s.id,
                text: s.text,
                created_at: s.created_at,
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);
        Ok(scored)
    }
}
