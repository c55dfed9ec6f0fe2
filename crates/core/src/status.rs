//! Job status derived from the filesystem.
//!
//! No job state is stored anywhere. A job is `Completed` once the terminal
//! artifact exists (and is non-empty) in its output directory, `Processing`
//! while the job directory exists without it, and `NotFound` otherwise.
//! Probing only reads metadata, so it is safe at any polling interval and
//! from any number of server processes sharing the same storage.

use serde::Serialize;

use crate::layout::JobLayout;

/// Status reported to polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotFound,
    Processing,
    Completed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Processing => "processing",
            Self::Completed => "completed",
        }
    }

    /// Whether a client should stop polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::NotFound | Self::Completed)
    }
}

/// Inspect the job directory and derive its status.
///
/// A zero-length artifact is treated as still being written.
pub async fn probe(layout: &JobLayout) -> JobStatus {
    if let Ok(meta) = tokio::fs::metadata(layout.artifact_path()).await {
        if meta.is_file() && meta.len() > 0 {
            return JobStatus::Completed;
        }
    }

    match tokio::fs::metadata(&layout.root).await {
        Ok(meta) if meta.is_dir() => JobStatus::Processing,
        _ => JobStatus::NotFound,
    }
}
