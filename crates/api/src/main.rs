use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vprompt_api::config::ServerConfig;
use vprompt_api::engine::artifacts::ArtifactStore;
use vprompt_api::engine::JobService;
use vprompt_api::router::build_app_router;
use vprompt_api::state::AppState;
use vprompt_comfyui::backend::ComfyUIBackend;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vprompt_api=debug,vprompt_comfyui=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Output directory ---
    let generation = &config.generation;
    tokio::fs::create_dir_all(&generation.output_dir)
        .await
        .expect("Failed to create output directory");
    tracing::info!(
        output_dir = %generation.output_dir.display(),
        public_path = %generation.public_output_path,
        "Artifact storage ready",
    );

    // --- Generation backend ---
    let backend = Arc::new(
        ComfyUIBackend::new(
            config.comfyui.api_url(),
            config.comfyui.ws_url(),
            generation.timing.request_timeout,
        )
        .expect("Failed to build ComfyUI HTTP client"),
    );
    tracing::info!(
        api_url = %config.comfyui.api_url(),
        request_timeout_secs = generation.timing.request_timeout.as_secs(),
        "ComfyUI backend configured",
    );

    // --- Job service ---
    let store = ArtifactStore::new(
        generation.output_dir.clone(),
        &generation.public_output_path,
        &generation.output_file_prefix,
    );
    let jobs = Arc::new(JobService::new(backend, store, generation.timing));
    tracing::info!(
        push_window_secs = generation.timing.push_window.as_secs(),
        poll_window_secs = generation.timing.poll_window.as_secs(),
        "Job service started",
    );

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: Arc::clone(&jobs),
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

    // --- Post-shutdown ---
    // Runner tasks are abandoned with the runtime; nothing is cancelled on
    // the backend.
    let unfinished = jobs.list().iter().filter(|j| !j.is_terminal()).count();
    tracing::info!(unfinished, "Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
