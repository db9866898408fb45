pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{crop_to_box, crop_window, decode_frame};
pub use metrics::{Metrics, MetricsSnapshot};
