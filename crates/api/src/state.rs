use std::sync::Arc;

use meshgate_csm::api::CsmApi;
use meshgate_pipeline::dispatcher::JobDispatcher;
use meshgate_pipeline::queue::DispatchQueue;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, built once at startup.
    pub config: Arc<ServerConfig>,
    /// Prepares reconstruction jobs inside the request.
    pub dispatcher: Arc<JobDispatcher>,
    /// Hands prepared jobs to the background worker.
    pub queue: DispatchQueue,
    /// Remote render client, `None` when no API key is configured.
    pub csm: Option<CsmApi>,
}
