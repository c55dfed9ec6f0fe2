//! Route definitions for the local reconstruction pipeline.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::render;
use crate::state::AppState;

/// ```text
/// POST   /render          -> submit_render   (multipart, field `images`)
/// GET    /status/{id}     -> get_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/render", post(render::submit_render))
        .route("/status/{id}", get(render::get_status))
}
