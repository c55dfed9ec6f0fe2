use std::path::PathBuf;

use meshgate_core::staging::StagingError;
use uuid::Uuid;

use crate::tool::ToolError;

/// A job could not be prepared, queued, or executed.
///
/// By the time this error is observed the job directory has been removed
/// (see [`crate::workspace::JobWorkspace`]).
#[derive(Debug, thiserror::Error)]
#[error("Dispatch failed for job {job_id}: {source}")]
pub struct DispatchError {
    pub job_id: Uuid,
    pub source: DispatchFailure,
}

impl DispatchError {
    pub fn new(job_id: Uuid, source: impl Into<DispatchFailure>) -> Self {
        Self {
            job_id,
            source: source.into(),
        }
    }
}

/// The underlying cause of a [`DispatchError`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchFailure {
    /// Creating the job's directories failed.
    #[error("workspace setup failed: {0}")]
    Workspace(#[from] std::io::Error),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The tool exited cleanly but the terminal artifact is absent.
    #[error("reconstruction finished without producing {}", .0.display())]
    MissingArtifact(PathBuf),

    /// The preparation task panicked or was cancelled by runtime shutdown.
    #[error("job preparation interrupted: {0}")]
    Interrupted(String),

    /// Too many jobs are already waiting to run.
    #[error("dispatch queue is full")]
    QueueFull,

    /// The background worker is no longer accepting jobs.
    #[error("dispatch queue is shut down")]
    QueueClosed,
}

impl DispatchFailure {
    /// Whether the failure stems from operator configuration rather than
    /// the request (tool missing or not executable).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Tool(ToolError::NotFound(_) | ToolError::PermissionDenied(_))
        )
    }
}
