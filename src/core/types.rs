// Data model for one processed frame

use serde::{Deserialize, Serialize};

use crate::core::errors::RecognitionError;

/// Class label reserved for regions synthesized by whole-frame fallback.
/// Detectors must never emit it.
pub const FALLBACK_CLASS: i32 = 99;

/// Axis-aligned box in frame pixel coordinates, serialized as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Clip to `[0, width] x [0, height]`
    pub fn clipped(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Candidate area within a frame, proposed by the detector or by fallback
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(rename = "class")]
    pub class_id: i32,
}

impl Region {
    pub fn new(bbox: BoundingBox, confidence: f64, class_id: i32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.class_id == FALLBACK_CLASS
    }
}

/// One region paired with its cleaned text (possibly empty)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub region: Region,
    pub text: String,
}

/// Ordered results for one frame: detector order, fallback region last
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn push(&mut self, region: Region, text: String) {
        self.detections.push(Detection { region, text });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }
}

/// What happened to a single region's recognition pass.
///
/// Every variant still yields an emitted region; only `Text` carries content.
#[derive(Debug)]
pub enum RegionOutcome {
    /// Cleaned text that passed the length filter
    Text(String),
    /// Cleaned text was shorter than the minimum and was discarded
    TooShort { cleaned_len: usize },
    /// Crop had zero area after clamping; recognizer was not called
    EmptyCrop,
    /// Recognizer failed for this region only
    Failed(RecognitionError),
}

impl RegionOutcome {
    pub fn into_text(self) -> String {
        match self {
            RegionOutcome::Text(text) => text,
            _ => String::new(),
        }
    }
}

/// Well-formed answer for the transport layer, success or failure
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FrameResponse {
    Detections(DetectionSet),
    Failed { error: String, kind: &'static str },
}

impl FrameResponse {
    pub fn is_failure(&self) -> bool {
        matches!(self, FrameResponse::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_wire_format() {
        let mut set = DetectionSet::default();
        set.push(
            Region::new(BoundingBox::new(10.0, 10.0, 50.0, 30.0), 0.8, 0),
            "Hello World!".to_string(),
        );

        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "detections": [{
                    "box": [10.0, 10.0, 50.0, 30.0],
                    "confidence": 0.8,
                    "class": 0,
                    "text": "Hello World!"
                }]
            })
        );
    }

    #[test]
    fn test_failed_response_shape() {
        let response = FrameResponse::Failed {
            error: "Frame decoding failed".to_string(),
            kind: "decode",
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], "Frame decoding failed");
        assert_eq!(json["kind"], "decode");
        assert!(json.get("detections").is_none());
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_clipped() {
        let b = BoundingBox::new(-5.0, 3.0, 120.0, 80.0).clipped(100, 50);
        assert_eq!(b, BoundingBox::new(0.0, 3.0, 100.0, 50.0));
    }

    #[test]
    fn test_outcome_text() {
        assert_eq!(RegionOutcome::Text("abc".into()).into_text(), "abc");
        assert_eq!(RegionOutcome::EmptyCrop.into_text(), "");
        assert_eq!(RegionOutcome::TooShort { cleaned_len: 2 }.into_text(), "");
    }
}
