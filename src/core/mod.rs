pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, DecodeError, DetectionError, PipelineError, RecognitionError};
pub use types::{
    BoundingBox, Detection, DetectionSet, FrameResponse, Region, RegionOutcome, FALLBACK_CLASS,
};
