//! Handlers for the remote render proxy.
//!
//! Nothing here touches the local pipeline. The remote service owns the
//! model; we only forward the image, relay its status, and acknowledge its
//! completion callback.

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::header::HOST;
use axum::http::HeaderMap;
use axum::Json;
use meshgate_csm::api::CsmApi;
use meshgate_csm::messages::WebhookPayload;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Path the remote service calls back on completion.
pub const WEBHOOK_PATH: &str = "/remote-webhook";

/// Multipart field carrying the single image.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRenderResponse {
    pub model_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_url: Option<String>,
}

/// POST /remote-render
///
/// The API key is checked before the body is looked at, so an unconfigured
/// server reports that regardless of what was sent and never contacts the
/// remote service.
pub async fn submit_remote(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<RemoteRenderResponse>> {
    let csm = require_client(&state)?;
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut file: Option<(Option<String>, Option<String>, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        file = Some((file_name, content_type, data));
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| AppError::BadRequest("No file provided".into()))?;

    tracing::info!(
        file_name = file_name.as_deref().unwrap_or(""),
        content_type = content_type.as_deref().unwrap_or(""),
        size = data.len(),
        "Remote render file received",
    );

    let webhook_url = webhook_url(state.config.public_base_url.as_deref(), &headers);
    let submitted = csm
        .submit_image(&data, &webhook_url)
        .await
        .map_err(|e| AppError::upstream(e, "CSM API request failed"))?;

    tracing::info!(model_id = %submitted.id, "Remote render submitted");

    Ok(Json(RemoteRenderResponse {
        model_id: submitted.id,
        status: "processing",
    }))
}

/// GET /remote-status/{id}
pub async fn get_remote_status(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> AppResult<Json<RemoteStatusResponse>> {
    let csm = require_client(&state)?;

    if !is_valid_model_id(&model_id) {
        return Err(AppError::BadRequest("Invalid model id".into()));
    }

    let model = csm
        .get_model(&model_id)
        .await
        .map_err(|e| AppError::upstream(e, "Failed to fetch model status"))?;

    Ok(Json(RemoteStatusResponse {
        status: model.status,
        viewer_url: model.viewer_url,
    }))
}

/// POST /remote-webhook
///
/// The body is parsed by hand so that a malformed payload is reported as a
/// webhook failure rather than an extractor rejection.
pub async fn receive_webhook(body: Bytes) -> AppResult<Json<Value>> {
    let payload = WebhookPayload::parse(&body).map_err(|e| AppError::Webhook(e.to_string()))?;

    tracing::info!(
        kind = payload.kind.as_deref().unwrap_or(""),
        model_id = payload.data.model_id.as_deref().unwrap_or(""),
        status = payload.data.status.as_deref().unwrap_or(""),
        viewer_url = payload.data.viewer_url.as_deref().unwrap_or(""),
        download_url = payload.data.download_url.as_deref().unwrap_or(""),
        "Remote render webhook received",
    );

    Ok(Json(json!({ "received": true })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_client(state: &AppState) -> AppResult<&CsmApi> {
    state.csm.as_ref().ok_or_else(|| {
        AppError::Configuration("CSM API key not configured".into())
    })
}

/// Remote model ids are opaque but never contain path separators.
fn is_valid_model_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Absolute URL of the webhook endpoint.
///
/// Prefers the configured public base URL. Otherwise derives it from the
/// request's `Host` header and `X-Forwarded-Proto` (default `http`).
fn webhook_url(public_base_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(base) = public_base_url {
        return format!("{}{WEBHOOK_PATH}", base.trim_end_matches('/'));
    }

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    format!("{scheme}://{host}{WEBHOOK_PATH}")
}
