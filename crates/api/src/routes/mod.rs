pub mod health;
pub mod remote;
pub mod render;

use axum::Router;

use crate::state::AppState;

/// Build the application route tree. Everything is mounted at the root.
///
/// Route hierarchy:
///
/// ```text
/// /render                     submit an image batch (POST, multipart)
/// /status/{id}                local job status
///
/// /remote-render              forward one image to the remote service (POST, multipart)
/// /remote-status/{id}         remote model status
/// /remote-webhook             remote completion callback (POST)
/// ```
pub fn app_routes() -> Router<AppState> {
    Router::new().merge(render::router()).merge(remote::router())
}
