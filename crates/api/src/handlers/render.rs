//! Handlers for the local reconstruction pipeline.
//!
//! A render request is validated, staged into a fresh job directory, and
//! queued; the response carries the job id immediately. Clients then poll
//! `/status/{id}`, which reads the job state straight off the filesystem.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use meshgate_core::error::CoreError;
use meshgate_core::intake::{validate_batch, UploadedImage};
use meshgate_core::layout::parse_job_id;
use meshgate_core::status::{probe, JobStatus};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Multipart field carrying the batch images.
pub const IMAGES_FIELD: &str = "images";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderAccepted {
    pub project_id: Uuid,
    pub message: &'static str,
    pub estimated_time: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: JobStatus,
}

/// POST /render
///
/// Accepts a multipart form with one `images` part per photo. Other parts
/// are ignored. Returns 202 with the new project id once the images are
/// staged and the job is queued.
pub async fn submit_render(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<RenderAccepted>)> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let mut images = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(IMAGES_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        images.push(UploadedImage {
            file_name,
            content_type,
            data: Vec::from(data),
        });
    }

    validate_batch(&images)?;

    let job = state.dispatcher.prepare(images).await?;
    let image_count = job.image_count();
    let project_id = state.queue.submit(job)?;

    tracing::info!(job_id = %project_id, images = image_count, "Render accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(RenderAccepted {
            project_id,
            message: "Processing started",
            estimated_time: "30-60 minutes",
        }),
    ))
}

/// GET /status/{id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let job_id = parse_job_id(&id)?;
    let layout = state.dispatcher.roots().job(job_id);

    match probe(&layout).await {
        JobStatus::NotFound => Err(AppError::Core(CoreError::NotFound {
            entity: "Project",
            id,
        })),
        status => Ok(Json(StatusResponse { status })),
    }
}
