//! Job preparation and execution.
//!
//! [`JobDispatcher::prepare`] is cheap enough to run inside a request: it
//! allocates the job id, lays out the directories, checks the tool, and
//! stages the images. [`JobDispatcher::execute`] is the long-running part
//! (tens of minutes) and belongs on a background worker.

use meshgate_core::intake::UploadedImage;
use meshgate_core::layout::{JobLayout, StorageRoots};
use meshgate_core::staging::{stage_images, StagingOptions};
use meshgate_core::status::{probe, JobStatus};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchFailure};
use crate::subprocess::ToolOutput;
use crate::tool::ReconstructionTool;
use crate::workspace::JobWorkspace;

/// Log at most this many characters of tool stdout per job.
const LOG_OUTPUT_CHARS: usize = 4000;

/// A job with staged inputs, waiting to be executed.
///
/// Dropping a `PreparedJob` without executing it removes its directory.
#[derive(Debug)]
pub struct PreparedJob {
    layout: JobLayout,
    workspace: JobWorkspace,
    image_count: usize,
}

impl PreparedJob {
    pub fn job_id(&self) -> Uuid {
        self.layout.job_id
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }
}

/// Creates job directories and runs the reconstruction tool against them.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    roots: StorageRoots,
    tool: ReconstructionTool,
    staging: StagingOptions,
}

impl JobDispatcher {
    pub fn new(roots: StorageRoots, tool: ReconstructionTool, staging: StagingOptions) -> Self {
        Self {
            roots,
            tool,
            staging,
        }
    }

    pub fn roots(&self) -> &StorageRoots {
        &self.roots
    }

    pub fn tool(&self) -> &ReconstructionTool {
        &self.tool
    }

    /// Lay out a new job and stage `images` into it.
    ///
    /// `images` must already have passed intake validation. On any failure
    /// the job directory is removed before the error is returned.
    ///
    /// The work runs on its own task, so dropping this future (request
    /// timeout, client disconnect) never interrupts staging half way. A job
    /// finished after its caller went away is dropped, which removes it.
    pub async fn prepare(&self, images: Vec<UploadedImage>) -> Result<PreparedJob, DispatchError> {
        let job_id = Uuid::new_v4();
        let dispatcher = self.clone();

        tokio::spawn(async move { dispatcher.stage_job(job_id, images).await })
            .await
            .map_err(|e| DispatchError::new(job_id, DispatchFailure::Interrupted(e.to_string())))?
    }

    async fn stage_job(
        &self,
        job_id: Uuid,
        images: Vec<UploadedImage>,
    ) -> Result<PreparedJob, DispatchError> {
        let layout = self.roots.job(job_id);
        let image_count = images.len();

        self.roots
            .ensure()
            .await
            .map_err(|e| DispatchError::new(job_id, e))?;

        let workspace = JobWorkspace::create(&layout)
            .await
            .map_err(|e| DispatchError::new(job_id, e))?;

        if let Err(e) = self.tool.verify().await {
            tracing::error!(
                job_id = %job_id,
                tool = %self.tool.path().display(),
                error = %e,
                "Reconstruction tool unavailable",
            );
            return Err(DispatchError::new(job_id, e));
        }

        let staged = stage_images(images, &layout.input_dir, self.staging)
            .await
            .map_err(|e| DispatchError::new(job_id, e))?;

        tracing::info!(
            job_id = %job_id,
            images = staged.len(),
            input_dir = %layout.input_dir.display(),
            "Job inputs staged",
        );

        Ok(PreparedJob {
            layout,
            workspace,
            image_count,
        })
    }

    /// Run the reconstruction tool for a prepared job and wait for it.
    ///
    /// Success requires a zero exit code and the terminal artifact in the
    /// output directory. Any other outcome removes the job directory.
    pub async fn execute(&self, job: PreparedJob) -> Result<ToolOutput, DispatchError> {
        let PreparedJob {
            layout,
            workspace,
            image_count,
        } = job;
        let job_id = layout.job_id;

        tracing::info!(
            job_id = %job_id,
            images = image_count,
            tool = %self.tool.path().display(),
            "Starting reconstruction",
        );

        let output = self
            .tool
            .run(&layout)
            .await
            .map_err(|e| DispatchError::new(job_id, e))?;

        if !output.stdout.trim().is_empty() {
            tracing::debug!(
                job_id = %job_id,
                stdout = %truncate(&output.stdout, LOG_OUTPUT_CHARS),
                "Reconstruction tool stdout",
            );
        }
        if !output.stderr.trim().is_empty() {
            tracing::warn!(
                job_id = %job_id,
                stderr = %truncate(&output.stderr, LOG_OUTPUT_CHARS),
                "Reconstruction tool stderr",
            );
        }

        if probe(&layout).await != JobStatus::Completed {
            return Err(DispatchError::new(
                job_id,
                DispatchFailure::MissingArtifact(layout.artifact_path()),
            ));
        }

        workspace.keep();
        Ok(output)
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
