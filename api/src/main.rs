mod inference;
mod orchestrator;
mod routes;
mod slot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use frame_describe_common::config::Config;
use inference::OpenAiAdapter;
use orchestrator::DescriptionOrchestrator;
use routes::AppState;
use slot::FrameSlot;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let slot = match FrameSlot::from_config(&config.slot).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open frame slot");
            std::process::exit(1);
        }
    };

    let api_key = std::env::var(&config.inference.api_key_env).ok();
    if api_key.is_none() {
        warn!(
            env = config.inference.api_key_env,
            "inference API key not set; requests will be sent without credentials"
        );
    }
    let adapter = match OpenAiAdapter::new(&config.inference.base_url, api_key) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            error!(error = %e, "failed to create inference adapter");
            std::process::exit(1);
        }
    };

    let orchestrator = DescriptionOrchestrator::new(
        slot,
        adapter,
        config.inference.model.clone(),
        config.inference.max_tokens,
        Duration::from_secs(config.inference.timeout_secs),
    );
    let state = Arc::new(AppState { orchestrator });
    let app = routes::router(state, routes::body_limit(config.capture.max_snapshot_kb));

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(
        addr,
        model = config.inference.model,
        slot_backend = ?config.slot.backend,
        deadline_secs = config.inference.timeout_secs,
        "frame-describe API server starting"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
