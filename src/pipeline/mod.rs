// Frame pipeline: decode → detect → per-region recognize → whole-frame fallback

pub mod text;

use image::{DynamicImage, GenericImageView};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, trace, warn};

use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::{BoundingBox, DetectionSet, FrameResponse, Region, RegionOutcome, FALLBACK_CLASS};
use crate::services::{Detector, Recognizer};
use crate::utils::{crop_to_box, decode_frame, Metrics};

pub use text::{clean_text, passes_fallback_filter, passes_region_filter};

/// Inset of the synthesized fallback box from each frame edge, in pixels
pub const FALLBACK_MARGIN: f64 = 10.0;

/// Box covering the frame minus [`FALLBACK_MARGIN`] on each side.
///
/// An axis too short to hold both margins spans the full extent instead.
pub fn fallback_box(width: u32, height: u32) -> BoundingBox {
    let inset = |extent: u32| -> (f64, f64) {
        let extent = extent as f64;
        if extent > 2.0 * FALLBACK_MARGIN {
            (FALLBACK_MARGIN, extent - FALLBACK_MARGIN)
        } else {
            (0.0, extent)
        }
    };
    let (x1, x2) = inset(width);
    let (y1, y2) = inset(height);
    BoundingBox::new(x1, y1, x2, y2)
}

/// Per-frame detection and recognition.
///
/// Holds only shared, read-only collaborators; every call owns its own frame
/// and results, so one instance serves concurrent requests.
pub struct FramePipeline {
    detector: Arc<dyn Detector>,
    recognizer: Arc<dyn Recognizer>,
    confidence_threshold: f32,
    metrics: Metrics,
}

impl FramePipeline {
    pub fn new(
        detector: Arc<dyn Detector>,
        recognizer: Arc<dyn Recognizer>,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            detector,
            recognizer,
            confidence_threshold,
            metrics: Metrics::new(),
        }
    }

    /// Report into a shared collector instead of a private one
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Run the full pipeline on one encoded frame.
    ///
    /// Decode and detector failures abort the call. Recognition failures only
    /// blank the affected region's text. An empty set is a successful result.
    #[instrument(skip(self, frame_bytes), fields(bytes = frame_bytes.len()))]
    pub fn process(&self, frame_bytes: &[u8]) -> PipelineResult<DetectionSet> {
        let image = decode_frame(frame_bytes)?;
        let (width, height) = image.dimensions();
        debug!("Decoded frame {}x{}", width, height);

        let regions = self.detector.detect(&image, self.confidence_threshold)?;
        debug!("Detector proposed {} regions", regions.len());

        let mut detections = DetectionSet::default();
        for (index, region) in regions.into_iter().enumerate() {
            let outcome = self.recognize_region(&image, &region);
            match &outcome {
                RegionOutcome::Text(text) => trace!(index, text = %text, "region text"),
                RegionOutcome::TooShort { cleaned_len } => {
                    trace!(index, cleaned_len, "region text below minimum length")
                }
                RegionOutcome::EmptyCrop => trace!(index, "region crop empty after clamping"),
                RegionOutcome::Failed(e) => {
                    warn!(index, "Recognition failed for region, keeping it without text: {}", e);
                    self.metrics.record_recognition_failure();
                }
            }

            let text = outcome.into_text();
            self.metrics.record_region(!text.is_empty());
            detections.push(region, text);
        }

        if detections.is_empty() {
            if let Some((region, text)) = self.fallback(&image) {
                self.metrics.record_region(true);
                detections.push(region, text);
            }
        }

        debug!("Processed frame: {} detections", detections.len());
        Ok(detections)
    }

    /// [`process`](Self::process) behind an error boundary.
    ///
    /// Every failure, panics included, becomes a `FrameResponse::Failed`
    /// payload instead of escaping to the caller.
    pub fn process_contained(&self, frame_bytes: &[u8]) -> FrameResponse {
        let start = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(frame_bytes)))
            .unwrap_or_else(|payload| Err(PipelineError::Unexpected(panic_message(payload.as_ref()))));

        match result {
            Ok(detections) => {
                self.metrics.record_frame(start.elapsed());
                FrameResponse::Detections(detections)
            }
            Err(e) => {
                error!("Error processing frame: {}", e);
                self.metrics.record_failure(e.kind());
                FrameResponse::Failed {
                    error: e.to_string(),
                    kind: e.kind(),
                }
            }
        }
    }

    fn recognize_region(&self, image: &DynamicImage, region: &Region) -> RegionOutcome {
        let Some(crop) = crop_to_box(image, &region.bbox) else {
            return RegionOutcome::EmptyCrop;
        };

        match self.recognizer.recognize(&crop) {
            Ok(raw) => {
                let cleaned = clean_text(&raw);
                if passes_region_filter(&cleaned) {
                    RegionOutcome::Text(cleaned)
                } else {
                    RegionOutcome::TooShort {
                        cleaned_len: cleaned.chars().count(),
                    }
                }
            }
            Err(e) => RegionOutcome::Failed(e),
        }
    }

    /// Whole-frame recognition, used only when the detector found nothing
    fn fallback(&self, image: &DynamicImage) -> Option<(Region, String)> {
        debug!("No regions proposed, running fallback recognition on full frame");

        let cleaned = match self.recognizer.recognize(image) {
            Ok(raw) => clean_text(&raw),
            Err(e) => {
                warn!("Fallback recognition failed: {}", e);
                self.metrics.record_recognition_failure();
                self.metrics.record_fallback(false);
                return None;
            }
        };

        let hit = passes_fallback_filter(&cleaned);
        self.metrics.record_fallback(hit);
        if !hit {
            return None;
        }

        debug!("Fallback text found: '{}'", cleaned);
        let (width, height) = image.dimensions();
        let region = Region::new(fallback_box(width, height), 1.0, FALLBACK_CLASS);
        Some((region, cleaned))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
