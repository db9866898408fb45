// Library exports for the per-frame text detection service

pub mod core;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, DecodeError, DetectionError, PipelineError, RecognitionError},
    types::{BoundingBox, Detection, DetectionSet, FrameResponse, Region, RegionOutcome, FALLBACK_CLASS},
};

pub use pipeline::FramePipeline;

pub use services::{Detector, OnnxDetector, OnnxRecognizer, Recognizer};

pub use utils::{decode_frame, Metrics};
