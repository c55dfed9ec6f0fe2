//! Scoped ownership of a job directory.
//!
//! A [`JobWorkspace`] is created before any job directory exists and removes
//! the whole job tree when dropped, unless [`JobWorkspace::keep`] was called.
//! Every failure path between "directory created" and "reconstruction
//! finished" therefore cleans up, including early returns, queue rejection,
//! and a worker task being aborted at shutdown.

use std::path::{Path, PathBuf};

use meshgate_core::layout::JobLayout;
use uuid::Uuid;

#[derive(Debug)]
pub struct JobWorkspace {
    job_id: Uuid,
    root: PathBuf,
    armed: bool,
}

impl JobWorkspace {
    /// Create the job's `input/` and `output/` directories.
    ///
    /// If creation fails part-way, whatever was created is removed.
    pub async fn create(layout: &JobLayout) -> std::io::Result<Self> {
        let workspace = Self {
            job_id: layout.job_id,
            root: layout.root.clone(),
            armed: true,
        };

        tokio::fs::create_dir_all(&layout.input_dir).await?;
        tokio::fs::create_dir_all(&layout.output_dir).await?;

        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The job finished; leave its directory in place.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {
                tracing::info!(
                    job_id = %self.job_id,
                    path = %self.root.display(),
                    "Removed job directory",
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    job_id = %self.job_id,
                    path = %self.root.display(),
                    error = %e,
                    "Failed to clean up job directory",
                );
            }
        }
    }
}
