// Main entry point for the per-frame text detection service

use livelearn_vision::{
    server::{self, AppState},
    Config, FramePipeline, OnnxDetector, OnnxRecognizer,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::new().context("Failed to load configuration")?;

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "livelearn_vision={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== LIVE-LEARN ASSIST VISION SERVER ===");
    info!(
        "Config: conf={} iou={} input={} detector_sessions={}",
        config.confidence_threshold(),
        config.iou_threshold(),
        config.target_size(),
        config.detection.pool_size
    );

    // Models are loaded once and shared by every request
    info!("Loading detector from {}...", config.detection.model_path);
    let detection_config = config.detection.clone();
    let detector = tokio::task::spawn_blocking(move || OnnxDetector::new(&detection_config))
        .await
        .context("Detector loading task failed")??;

    info!("Loading recognizer from {}...", config.recognition.model_path);
    let recognition_config = config.recognition.clone();
    let recognizer = tokio::task::spawn_blocking(move || OnnxRecognizer::new(&recognition_config))
        .await
        .context("Recognizer loading task failed")??;

    let pipeline = FramePipeline::new(
        Arc::new(detector),
        Arc::new(recognizer),
        config.confidence_threshold(),
    );
    info!("✓ Pipeline ready (detector threshold {})", pipeline.confidence_threshold());
    let app = server::router(AppState::new(pipeline), config.max_upload_bytes());

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /         - Status");
    info!("  GET  /health   - Health check");
    info!("  GET  /metrics  - Prometheus metrics");
    info!("  GET  /stats    - Detailed statistics");
    info!("  POST /detect   - Detect text in a frame (multipart field 'file')");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
