// Error types for the frame pipeline and its collaborators
//
// Request-level failures (decode, detection) surface to the caller.
// Recognition failures stay local to the region that produced them.

use thiserror::Error;

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Input is not a decodable image: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("Decoded image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// Detector capability errors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("ONNX inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),

    #[error("Image preprocessing failed: {0}")]
    PreprocessingFailed(String),

    #[error("Unexpected detector output shape: {0:?}")]
    UnexpectedOutput(Vec<usize>),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },

    #[error("Model has {num_classes} classes, overlapping the reserved fallback class {reserved}")]
    LabelSpaceOverlap { num_classes: usize, reserved: i32 },

    #[error("No detector session available: {0}")]
    SessionUnavailable(String),
}

/// Recognizer capability errors (absorbed per region)
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("ONNX inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),

    #[error("Image preprocessing failed: {0}")]
    PreprocessingFailed(String),

    #[error("Unexpected recognizer output shape: {0:?}")]
    UnexpectedOutput(Vec<usize>),

    #[error("Recognizer failed: {0}")]
    Other(String),
}

/// Request-level pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Frame decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Detection failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("Unexpected pipeline failure: {0}")]
    Unexpected(String),
}

impl PipelineError {
    /// Stable machine-readable tag used in error payloads and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "decode",
            PipelineError::Detection(_) => "detection",
            PipelineError::Unexpected(_) => "internal",
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid recognition config: {0}")]
    InvalidRecognitionConfig(String),

    #[error("Invalid server config: {0}")]
    InvalidServerConfig(String),

    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("IoU threshold must be in [0.0, 1.0], got {0}")]
    InvalidIoUThreshold(f32),

    #[error("Pool size must be > 0, got {0}")]
    InvalidPoolSize(usize),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
pub type DetectionResult<T> = Result<T, DetectionError>;
pub type RecognitionResult<T> = Result<T, RecognitionError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
