use axum::extract::State;
use axum::{routing::get, Json, Router};
use meshgate_core::layout::StorageRoots;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the reconstruction executable exists and is executable.
    pub tool_available: bool,
    /// Whether job directories can be created under the uploads base.
    pub storage_writable: bool,
    /// Whether a remote render API key is configured.
    pub remote_configured: bool,
}

/// GET /health -- returns service, tool, and storage health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let tool_available = state.dispatcher.tool().verify().await.is_ok();
    let storage_writable = storage_writable(state.dispatcher.roots()).await;

    let status = if tool_available && storage_writable {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        tool_available,
        storage_writable,
        remote_configured: state.csm.is_some(),
    })
}

/// Create the storage roots and round-trip a probe file through the uploads base.
async fn storage_writable(roots: &StorageRoots) -> bool {
    if let Err(e) = roots.ensure().await {
        tracing::warn!(error = %e, path = %roots.uploads_base.display(), "Storage roots unavailable");
        return false;
    }

    let probe = roots
        .uploads_base
        .join(format!(".health-{}", uuid::Uuid::new_v4()));
    match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %probe.display(), "Uploads base not writable");
            false
        }
    }
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
