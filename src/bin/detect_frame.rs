//! Run the frame pipeline on one image file and print the result as JSON
//! Run with: cargo run --release --bin detect_frame -- <image_path>

use anyhow::{Context, Result};
use livelearn_vision::{Config, FramePipeline, OnnxDetector, OnnxRecognizer};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("livelearn_vision=debug")
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Get image path from args
    let args: Vec<String> = std::env::args().collect();
    let image_path = if args.len() > 1 {
        args[1].clone()
    } else {
        "frame.jpg".to_string()
    };

    if !Path::new(&image_path).exists() {
        eprintln!("Image not found: {}", image_path);
        std::process::exit(1);
    }

    let config = Config::new().context("Failed to load configuration")?;

    info!("Loading models...");
    let detector = OnnxDetector::new(&config.detection)?;
    let recognizer = OnnxRecognizer::new(&config.recognition)?;
    let pipeline = FramePipeline::new(
        Arc::new(detector),
        Arc::new(recognizer),
        config.confidence_threshold(),
    );

    info!("Processing {}", image_path);
    let bytes = std::fs::read(&image_path)
        .with_context(|| format!("Failed to read {}", image_path))?;
    let detections = pipeline.process(&bytes)?;

    println!("{}", serde_json::to_string_pretty(&detections)?);
    Ok(())
}
