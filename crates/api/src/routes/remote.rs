//! Route definitions for the remote render proxy.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::remote;
use crate::state::AppState;

/// ```text
/// POST   /remote-render        -> submit_remote      (multipart, field `file`)
/// GET    /remote-status/{id}   -> get_remote_status
/// POST   /remote-webhook       -> receive_webhook
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/remote-render", post(remote::submit_remote))
        .route("/remote-status/{id}", get(remote::get_remote_status))
        .route(remote::WEBHOOK_PATH, post(remote::receive_webhook))
}
