#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Path as UrlPath;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::routing::{self, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use meshgate_api::config::{CsmConfig, RenderConfig, ServerConfig};
use meshgate_api::router::build_app_router;
use meshgate_api::state::AppState;
use meshgate_core::layout::StorageRoots;
use meshgate_core::staging::StagingOptions;
use meshgate_pipeline::dispatcher::JobDispatcher;
use meshgate_pipeline::queue::DispatchQueue;

/// Fake reconstruction tool: waits, then writes the terminal artifact.
///
/// Run through `/bin/sh`, so `$4` is the output directory.
pub const SLOW_SUCCESS: &str = "sleep 1\nprintf 'v 0 0 0\\n' > \"$4/texturedMesh.obj\"";

/// Fake reconstruction tool that exits without producing anything.
pub const PRODUCES_NOTHING: &str = "exit 0";

/// API key the CSM stub accepts.
pub const CSM_KEY: &str = "test-key";

/// A running application over a scratch directory.
pub struct TestApp {
    pub router: Router,
    pub config: ServerConfig,
    pub roots: StorageRoots,
    pub cancel: CancellationToken,
    pub dir: TempDir,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Names of the entries directly under the uploads base.
    pub fn job_dirs(&self) -> Vec<String> {
        std::fs::read_dir(&self.roots.uploads_base)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build a test `ServerConfig` rooted in `dir`.
///
/// The reconstruction tool is `/bin/sh` running `dir/tool.sh`; write the
/// script with [`write_tool`]. No CSM key is configured.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_upload_bytes: 550 * 1024 * 1024,
        public_base_url: None,
        render: RenderConfig {
            uploads_base: dir.join("uploads"),
            work_dir: dir.join("work"),
            meshroom_path: PathBuf::from("/bin/sh"),
            meshroom_args: vec![dir.join("tool.sh").to_string_lossy().into_owned()],
            tool_timeout_secs: Some(30),
            max_concurrent_runs: 2,
            queue_capacity: 8,
        },
        csm: CsmConfig {
            api_key: None,
            api_url: "http://127.0.0.1:1".to_string(),
        },
    }
}

pub fn write_tool(dir: &Path, body: &str) {
    std::fs::write(dir.join("tool.sh"), format!("#!/bin/sh\n{body}\n")).expect("write tool script");
}

/// Build the full application router, mirroring `main.rs`.
pub fn build_test_app(config: ServerConfig, dir: TempDir) -> TestApp {
    let roots = config.render.storage_roots();
    let dispatcher = Arc::new(JobDispatcher::new(
        roots.clone(),
        config.render.tool(),
        StagingOptions::default(),
    ));
    let cancel = CancellationToken::new();
    let (queue, _worker) = DispatchQueue::start(
        Arc::clone(&dispatcher),
        config.queue_config(),
        cancel.clone(),
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        dispatcher,
        queue,
        csm: config.csm.client(),
    };

    TestApp {
        router: build_app_router(state, &config),
        config,
        roots,
        cancel,
        dir,
    }
}

/// Default app: a tool that succeeds after a short delay.
pub fn spawn_app() -> TestApp {
    spawn_app_with_tool(SLOW_SUCCESS)
}

pub fn spawn_app_with_tool(script: &str) -> TestApp {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_tool(dir.path(), script);
    let config = test_config(dir.path());
    build_test_app(config, dir)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_bytes(app: Router, uri: &str, content_type: &str, body: Vec<u8>) -> Response {
    let request = Request::post(uri)
        .header("content-type", content_type)
        .header("host", "meshgate.test")
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_multipart(app: Router, uri: &str, parts: &[Part]) -> Response {
    post_bytes(app, uri, &multipart_content_type(), multipart_body(parts)).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "meshgate-test-boundary-7MA4YWxkTrZu0gW";

/// One file part of a multipart form.
#[derive(Clone)]
pub struct Part {
    pub name: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Part {
    pub fn image(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            file_name: "photo.png".to_string(),
            content_type: "image/png".to_string(),
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                part.name, part.file_name, part.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// A small PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([120, 30, 200])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// `count` PNG parts under the `images` field.
pub fn image_parts(count: usize) -> Vec<Part> {
    let png = png_bytes();
    (0..count).map(|_| Part::image("images", png.clone())).collect()
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Poll `/status/{id}` until it reports `expected` or ten seconds pass.
pub async fn wait_for_status(app: Router, id: &str, expected: &str) -> Value {
    let mut last = Value::Null;
    for _ in 0..100 {
        let response = get(app.clone(), &format!("/status/{id}")).await;
        last = body_json(response).await;
        if last["status"] == expected {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job {id} never reached {expected}, last response: {last}");
}

// ---------------------------------------------------------------------------
// Remote service stub
// ---------------------------------------------------------------------------

/// A local stand-in for the CSM API.
pub struct CsmStub {
    pub url: String,
    /// `webhook_url` of the last accepted submission.
    pub last_webhook: Arc<Mutex<Option<String>>>,
}

fn stub_authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == CSM_KEY)
}

pub async fn spawn_csm_stub() -> CsmStub {
    let last_webhook: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let recorded = Arc::clone(&last_webhook);

    let router = Router::new()
        .route(
            "/v1/models",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let recorded = Arc::clone(&recorded);
                async move {
                    if !stub_authorized(&headers) {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({ "message": "Invalid API key" })),
                        );
                    }
                    if body["image"].as_str().unwrap_or("").is_empty() {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "message": "image is required" })),
                        );
                    }
                    *recorded.lock().unwrap() = body["webhook_url"].as_str().map(str::to_string);
                    (StatusCode::OK, Json(json!({ "id": "model-123" })))
                }
            }),
        )
        .route(
            "/v1/models/{id}",
            routing::get(|headers: HeaderMap, UrlPath(id): UrlPath<String>| async move {
                if !stub_authorized(&headers) {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({ "message": "Invalid API key" })),
                    );
                }
                if id == "model-123" {
                    (
                        StatusCode::OK,
                        Json(json!({
                            "status": "completed",
                            "viewer_url": "https://viewer.test/model-123",
                        })),
                    )
                } else {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({ "message": "Model not found" })),
                    )
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    CsmStub {
        url: format!("http://{addr}"),
        last_webhook,
    }
}

/// App whose remote client points at `stub` with the given key.
pub fn spawn_app_with_csm(stub: &CsmStub, key: &str) -> TestApp {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_tool(dir.path(), SLOW_SUCCESS);
    let mut config = test_config(dir.path());
    config.csm = CsmConfig {
        api_key: Some(key.to_string()),
        api_url: stub.url.clone(),
    };
    build_test_app(config, dir)
}
