//! On-disk layout of reconstruction jobs.
//!
//! ```text
//! {uploads_base}/{job_id}/input/image_{n}.jpg
//! {uploads_base}/{job_id}/output/texturedMesh.obj
//! {work_dir}/images/
//! {work_dir}/cache/
//! ```
//!
//! The `images/` and `cache/` directories are shared by every job; the
//! reconstruction tool uses `cache/` for its intermediate node data.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::CoreError;

/// Per-job subdirectory holding the normalized input images.
pub const INPUT_DIR_NAME: &str = "input";

/// Per-job subdirectory the reconstruction tool writes into.
pub const OUTPUT_DIR_NAME: &str = "output";

/// Shared working directory for images.
pub const IMAGES_DIR_NAME: &str = "images";

/// Shared cache directory handed to the reconstruction tool.
pub const CACHE_DIR_NAME: &str = "cache";

/// File whose presence in `output/` marks a finished reconstruction.
pub const TERMINAL_ARTIFACT: &str = "texturedMesh.obj";

/// File name of the `n`-th (1-based) staged input image.
pub fn input_image_name(n: usize) -> String {
    format!("image_{n}.jpg")
}

/// Parse a client-supplied job id.
///
/// Anything that is not a UUID cannot name a job, so it is reported as not
/// found. This also keeps path segments like `..` out of the filesystem.
pub fn parse_job_id(raw: &str) -> Result<Uuid, CoreError> {
    Uuid::parse_str(raw.trim()).map_err(|_| CoreError::NotFound {
        entity: "Project",
        id: raw.to_string(),
    })
}

/// Root directories every job is laid out under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoots {
    pub uploads_base: PathBuf,
    pub images_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl StorageRoots {
    /// Jobs live under `uploads_base`; the shared directories under `work_dir`.
    pub fn new(uploads_base: impl Into<PathBuf>, work_dir: impl AsRef<Path>) -> Self {
        let work_dir = work_dir.as_ref();
        Self {
            uploads_base: uploads_base.into(),
            images_dir: work_dir.join(IMAGES_DIR_NAME),
            cache_dir: work_dir.join(CACHE_DIR_NAME),
        }
    }

    /// Create the base and shared directories if they are missing.
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.uploads_base).await?;
        tokio::fs::create_dir_all(&self.images_dir).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        Ok(())
    }

    /// Paths for the job with the given id. Nothing is created.
    pub fn job(&self, job_id: Uuid) -> JobLayout {
        let root = self.uploads_base.join(job_id.to_string());
        JobLayout {
            job_id,
            input_dir: root.join(INPUT_DIR_NAME),
            output_dir: root.join(OUTPUT_DIR_NAME),
            cache_dir: self.cache_dir.clone(),
            root,
        }
    }
}

/// Resolved paths of a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    pub job_id: Uuid,
    pub root: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl JobLayout {
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(TERMINAL_ARTIFACT)
    }

    pub fn input_image_path(&self, n: usize) -> PathBuf {
        self.input_dir.join(input_image_name(n))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn job_paths_nest_under_uploads_base() {
        let roots = StorageRoots::new("/srv/uploads", "/srv/work");
        let id = Uuid::new_v4();
        let job = roots.job(id);

        assert_eq!(job.root, PathBuf::from(format!("/srv/uploads/{id}")));
        assert_eq!(job.input_dir, job.root.join("input"));
        assert_eq!(job.output_dir, job.root.join("output"));
        assert_eq!(job.cache_dir, PathBuf::from("/srv/work/cache"));
        assert_eq!(roots.images_dir, PathBuf::from("/srv/work/images"));
        assert_eq!(job.artifact_path(), job.root.join("output/texturedMesh.obj"));
        assert_eq!(job.input_image_path(3), job.root.join("input/image_3.jpg"));
    }

    #[test]
    fn input_image_names_are_one_based() {
        assert_eq!(input_image_name(1), "image_1.jpg");
        assert_eq!(input_image_name(50), "image_50.jpg");
    }

    #[test]
    fn parse_job_id_accepts_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_job_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_job_id_rejects_traversal_as_not_found() {
        for raw in ["..", "../etc", "not-a-uuid", ""] {
            assert_matches!(parse_job_id(raw), Err(CoreError::NotFound { entity: "Project", .. }));
        }
    }

    #[tokio::test]
    async fn ensure_creates_shared_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let roots = StorageRoots::new(tmp.path().join("uploads"), tmp.path().join("work"));

        roots.ensure().await.expect("ensure");
        roots.ensure().await.expect("ensure is idempotent");

        assert!(roots.uploads_base.is_dir());
        assert!(roots.images_dir.is_dir());
        assert!(roots.cache_dir.is_dir());
    }
}
