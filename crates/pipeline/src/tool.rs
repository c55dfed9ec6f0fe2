//! The external reconstruction executable (Meshroom's `meshroom_batch`).
//!
//! The tool is invoked as
//!
//! ```text
//! <path> [leading args...] --input <input_dir> --output <output_dir> --cache <cache_dir>
//! ```
//!
//! Leading arguments allow running it through a wrapper (an interpreter or
//! a container launcher) without changing the contract.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use meshgate_core::layout::JobLayout;
use tokio::process::Command;

use crate::subprocess::{self, ToolOutput};

/// Flag preceding the directory of staged images.
pub const INPUT_FLAG: &str = "--input";

/// Flag preceding the directory the mesh is written to.
pub const OUTPUT_FLAG: &str = "--output";

/// Flag preceding the shared cache directory.
pub const CACHE_FLAG: &str = "--cache";

/// Amount of stderr kept in [`ToolError::ExecutionFailed`].
const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Reconstruction tool not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Reconstruction tool timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Reconstruction tool failed with exit code {exit_code}: {stderr}")]
    ExecutionFailed {
        exit_code: i32,
        /// Tail of the captured stderr.
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Location and invocation settings of the reconstruction executable.
#[derive(Debug, Clone)]
pub struct ReconstructionTool {
    path: PathBuf,
    leading_args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ReconstructionTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            leading_args: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kill the tool if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that the executable exists and, on unix, is executable.
    pub async fn verify(&self) -> Result<(), ToolError> {
        let display = self.path.display().to_string();
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|_| ToolError::NotFound(display.clone()))?;

        if !metadata.is_file() {
            return Err(ToolError::NotFound(display));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                return Err(ToolError::PermissionDenied(format!(
                    "{display} is not executable (mode {mode:#o})"
                )));
            }
        }

        Ok(())
    }

    /// Full argument list for a job, leading arguments included.
    pub fn args(&self, layout: &JobLayout) -> Vec<OsString> {
        let mut args = self.leading_args.clone();
        args.extend([
            OsString::from(INPUT_FLAG),
            layout.input_dir.clone().into_os_string(),
            OsString::from(OUTPUT_FLAG),
            layout.output_dir.clone().into_os_string(),
            OsString::from(CACHE_FLAG),
            layout.cache_dir.clone().into_os_string(),
        ]);
        args
    }

    /// Run the tool for a job and wait for it to exit.
    ///
    /// A non-zero exit becomes [`ToolError::ExecutionFailed`] carrying the
    /// tail of stderr.
    pub async fn run(&self, layout: &JobLayout) -> Result<ToolOutput, ToolError> {
        self.verify().await?;

        let mut cmd = Command::new(&self.path);
        cmd.args(self.args(layout));

        let output = subprocess::run_command(&mut cmd, self.timeout).await?;
        if !output.success() {
            return Err(ToolError::ExecutionFailed {
                exit_code: output.exit_code,
                stderr: tail(&output.stderr, STDERR_TAIL_CHARS).to_string(),
            });
        }
        Ok(output)
    }
}

/// Last `max_chars` characters of `s`.
fn tail(s: &str, max_chars: usize) -> &str {
    let trimmed = s.trim_end();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed;
    }
    let skip = trimmed
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &trimmed[skip..]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
