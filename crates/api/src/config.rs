use std::path::PathBuf;
use std::time::Duration;

use meshgate_core::layout::StorageRoots;
use meshgate_csm::api::{CsmApi, DEFAULT_API_URL};
use meshgate_pipeline::queue::QueueConfig;
use meshgate_pipeline::tool::ReconstructionTool;

/// Room for a full batch (50 images at 10 MiB) plus multipart overhead.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 550 * 1024 * 1024;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `60`).
    pub request_timeout_secs: u64,
    /// Grace period for in-flight reconstructions at shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Largest accepted request body in bytes.
    pub max_upload_bytes: usize,
    /// Externally reachable base URL, used to build the remote webhook URL.
    pub public_base_url: Option<String>,
    /// Local reconstruction pipeline settings.
    pub render: RenderConfig,
    /// Remote render service settings.
    pub csm: CsmConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `60`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                       |
    /// | `MAX_UPLOAD_BYTES`      | `576716800` (550 MiB)      |
    /// | `PUBLIC_BASE_URL`       | unset                      |
    ///
    /// See [`RenderConfig::from_env`] and [`CsmConfig::from_env`] for the
    /// nested sections.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .ok()
            .map(|v| v.parse().expect("MAX_UPLOAD_BYTES must be a valid usize"))
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let public_base_url = non_empty_var("PUBLIC_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            max_upload_bytes,
            public_base_url,
            render: RenderConfig::from_env(),
            csm: CsmConfig::from_env(),
        }
    }

    /// Settings for the background reconstruction worker.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.render.queue_capacity,
            max_concurrent_runs: self.render.max_concurrent_runs,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

/// Where jobs live and how the reconstruction tool is launched.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Parent of every job directory.
    pub uploads_base: PathBuf,
    /// Parent of the shared `images/` and `cache/` directories.
    pub work_dir: PathBuf,
    /// Reconstruction executable.
    pub meshroom_path: PathBuf,
    /// Arguments placed before the `--input/--output/--cache` flags.
    pub meshroom_args: Vec<String>,
    /// Kill the tool after this many seconds. `None` waits indefinitely.
    pub tool_timeout_secs: Option<u64>,
    /// Reconstructions allowed to run at once.
    pub max_concurrent_runs: usize,
    /// Prepared jobs allowed to wait for a run slot.
    pub queue_capacity: usize,
}

impl RenderConfig {
    /// | Env Var                   | Default                        |
    /// |---------------------------|--------------------------------|
    /// | `UPLOADS_BASE`            | `/tmp/uploads`                 |
    /// | `WORK_DIR`                | current directory              |
    /// | `MESHROOM_PATH`           | `/opt/meshroom/meshroom_batch` |
    /// | `MESHROOM_ARGS`           | empty (whitespace-separated)   |
    /// | `TOOL_TIMEOUT_SECS`       | unset                          |
    /// | `MAX_CONCURRENT_RUNS`     | `1`                            |
    /// | `DISPATCH_QUEUE_CAPACITY` | `16`                           |
    pub fn from_env() -> Self {
        let uploads_base = PathBuf::from(
            std::env::var("UPLOADS_BASE").unwrap_or_else(|_| "/tmp/uploads".into()),
        );

        let work_dir = non_empty_var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let meshroom_path = PathBuf::from(
            std::env::var("MESHROOM_PATH")
                .unwrap_or_else(|_| "/opt/meshroom/meshroom_batch".into()),
        );

        let meshroom_args: Vec<String> = std::env::var("MESHROOM_ARGS")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let tool_timeout_secs: Option<u64> = non_empty_var("TOOL_TIMEOUT_SECS")
            .map(|v| v.parse().expect("TOOL_TIMEOUT_SECS must be a valid u64"));

        let max_concurrent_runs: usize = std::env::var("MAX_CONCURRENT_RUNS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("MAX_CONCURRENT_RUNS must be a valid usize");

        let queue_capacity: usize = std::env::var("DISPATCH_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "16".into())
            .parse()
            .expect("DISPATCH_QUEUE_CAPACITY must be a valid usize");

        Self {
            uploads_base,
            work_dir,
            meshroom_path,
            meshroom_args,
            tool_timeout_secs,
            max_concurrent_runs,
            queue_capacity,
        }
    }

    pub fn storage_roots(&self) -> StorageRoots {
        StorageRoots::new(&self.uploads_base, &self.work_dir)
    }

    pub fn tool(&self) -> ReconstructionTool {
        ReconstructionTool::new(&self.meshroom_path)
            .with_leading_args(&self.meshroom_args)
            .with_timeout(self.tool_timeout_secs.map(Duration::from_secs))
    }
}

/// Credentials and endpoint of the remote render service.
#[derive(Clone)]
pub struct CsmConfig {
    pub api_key: Option<String>,
    pub api_url: String,
}

impl std::fmt::Debug for CsmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl CsmConfig {
    /// | Env Var       | Default                 |
    /// |---------------|-------------------------|
    /// | `CSM_API_KEY` | unset                   |
    /// | `CSM_API_URL` | `https://api.3d.csm.ai` |
    pub fn from_env() -> Self {
        Self {
            api_key: non_empty_var("CSM_API_KEY"),
            api_url: std::env::var("CSM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into()),
        }
    }

    /// An API client, or `None` when no key is configured.
    pub fn client(&self) -> Option<CsmApi> {
        self.api_key
            .as_ref()
            .map(|key| CsmApi::new(self.api_url.clone(), key.clone()))
    }
}

/// Read an env var, treating an empty value as unset.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render() -> RenderConfig {
        RenderConfig {
            uploads_base: "/srv/uploads".into(),
            work_dir: "/srv/work".into(),
            meshroom_path: "/usr/bin/python3".into(),
            meshroom_args: vec!["meshroom_batch.py".into()],
            tool_timeout_secs: Some(600),
            max_concurrent_runs: 2,
            queue_capacity: 8,
        }
    }

    #[test]
    fn render_config_builds_roots_and_tool() {
        let config = render();

        let roots = config.storage_roots();
        assert_eq!(roots.uploads_base, PathBuf::from("/srv/uploads"));
        assert_eq!(roots.cache_dir, PathBuf::from("/srv/work/cache"));

        let tool = config.tool();
        assert_eq!(tool.path(), std::path::Path::new("/usr/bin/python3"));
        let args = tool.args(&roots.job(uuid::Uuid::nil()));
        assert_eq!(args[0], "meshroom_batch.py");
        assert_eq!(args[1], "--input");
    }

    #[test]
    fn csm_client_requires_key() {
        let mut csm = CsmConfig {
            api_key: None,
            api_url: DEFAULT_API_URL.into(),
        };
        assert!(csm.client().is_none());

        csm.api_key = Some("k".into());
        assert_eq!(csm.client().unwrap().api_url(), DEFAULT_API_URL);
        assert!(!format!("{csm:?}").contains("\"k\""));
    }
}
