mod camera;
mod encoder;
mod scheduler;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camera::HttpCamera;
use encoder::SnapshotEncoder;
use frame_describe_common::config::Config;
use frame_describe_common::snapshot::SizeGuard;
use scheduler::{CaptureCycle, CaptureScheduler};
use tracing::{error, info};
use transport::HttpTransport;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
    #[error("capture error: {0}")]
    Capture(#[from] camera::CaptureError),
    #[error("encoder error: {0}")]
    Encode(#[from] encoder::EncodeError),
}

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

    let camera_url = match config.camera_url() {
        Ok(url) => url.to_string(),
        Err(e) => {
            eprintln!("Invalid config {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera_url,
        server_url = config.client.server_url,
        interval_secs = config.capture.interval_secs,
        scale = config.capture.scale,
        quality = config.capture.quality,
        max_snapshot_kb = config.capture.max_snapshot_kb,
        "starting frame-describe producer"
    );

    if let Err(e) = run(&config, &camera_url).await {
        error!(error = %e, "producer failed");
        std::process::exit(1);
    }
}

async fn run(config: &Config, camera_url: &str) -> Result<(), ProducerError> {
    let encoder = SnapshotEncoder::new(config.capture.scale, config.capture.quality)?;
    let transport = HttpTransport::new(
        &config.client.server_url,
        Duration::from_secs(config.client.request_timeout_secs),
    )?;

    // Capture never starts if the device cannot be acquired.
    let camera = Arc::new(
        HttpCamera::open(
            camera_url,
            Duration::from_secs(config.capture.connect_timeout_secs),
        )
        .await?,
    );

    let cycle = Arc::new(CaptureCycle::new(
        Arc::clone(&camera) as Arc<dyn camera::FrameSource>,
        encoder,
        SizeGuard::new(config.capture.max_snapshot_kb),
        Arc::new(transport),
    ));
    let mut scheduler =
        CaptureScheduler::start(Duration::from_secs(config.capture.interval_secs), cycle);

    // Stand-in for the description display: print each new description.
    let mut latest = scheduler.latest_description();
    let display = tokio::spawn(async move {
        while latest.changed().await.is_ok() {
            let text = latest.borrow_and_update().clone();
            println!("{text}");
        }
    });

    if scheduler.is_active() {
        info!("stream active, press Ctrl-C to stop");
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");

    scheduler.stop().await;
    camera.close();
    display.abort();

    info!(cycles = scheduler.completed_cycles(), "producer stopped");
    Ok(())
}
