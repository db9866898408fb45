pub mod detection;
pub mod ocr;
pub mod onnx_builder; // Shared CPU session builder and session pool

// Re-export commonly used services
pub use detection::{Detector, OnnxDetector};
pub use ocr::{OnnxRecognizer, Recognizer};
