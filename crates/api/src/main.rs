use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshgate_api::config::ServerConfig;
use meshgate_api::router::build_app_router;
use meshgate_api::state::AppState;
use meshgate_core::staging::StagingOptions;
use meshgate_pipeline::dispatcher::JobDispatcher;
use meshgate_pipeline::queue::DispatchQueue;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "meshgate_api=debug,meshgate_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Reconstruction pipeline ---
    let roots = config.render.storage_roots();
    roots
        .ensure()
        .await
        .expect("Failed to create upload and work directories");
    tracing::info!(
        uploads_base = %roots.uploads_base.display(),
        cache_dir = %roots.cache_dir.display(),
        "Storage roots ready",
    );

    let tool = config.render.tool();
    match tool.verify().await {
        Ok(()) => tracing::info!(tool = %tool.path().display(), "Reconstruction tool found"),
        // Not fatal: the remote proxy still works and /health reports it.
        Err(e) => tracing::warn!(tool = %tool.path().display(), error = %e, "Reconstruction tool unavailable"),
    }

    let dispatcher = Arc::new(JobDispatcher::new(roots, tool, StagingOptions::default()));

    let worker_cancel = CancellationToken::new();
    let (queue, worker_handle) = DispatchQueue::start(
        Arc::clone(&dispatcher),
        config.queue_config(),
        worker_cancel.clone(),
    );
    tracing::info!("Reconstruction worker started");

    // --- Remote render client ---
    let csm = config.csm.client();
    if csm.is_none() {
        tracing::warn!("CSM_API_KEY not set, remote render endpoints will fail");
    }

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        dispatcher,
        queue,
        csm,
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // The worker applies the shutdown timeout to in-flight runs itself.
    worker_cancel.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Reconstruction worker ended abnormally");
    }
    tracing::info!("Reconstruction worker stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
