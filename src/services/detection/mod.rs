// Text region detection
//
// `Detector` is the capability the frame pipeline consumes. `OnnxDetector`
// implements it for a YOLOv8 ONNX export.

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;
use ort::value::Value;
use std::path::Path;
use tracing::{debug, info, trace};

use crate::core::config::DetectionConfig;
use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::{BoundingBox, Region, FALLBACK_CLASS};
use crate::services::onnx_builder::OnnxSessionPool;

/// Proposes candidate regions in a decoded frame.
///
/// Implementations are shared across concurrent requests and must either be
/// safe for concurrent use or serialize internally.
pub trait Detector: Send + Sync {
    /// Regions with confidence `>= confidence_threshold`, boxes clipped to the frame.
    fn detect(
        &self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> DetectionResult<Vec<Region>>;
}

/// Grey used by YOLO for letterbox padding
const LETTERBOX_FILL: u8 = 114;

/// Scale and padding applied when letterboxing a frame into the model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub resized_width: u32,
    pub resized_height: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let resized_width = ((width as f32 * scale).round() as u32).clamp(1, target);
        let resized_height = ((height as f32 * scale).round() as u32).clamp(1, target);
        Self {
            scale,
            pad_x: (target - resized_width) / 2,
            pad_y: (target - resized_height) / 2,
            resized_width,
            resized_height,
        }
    }

    /// Map a point in model input space back to frame pixels
    pub fn unmap(&self, x: f32, y: f32) -> (f64, f64) {
        (
            ((x - self.pad_x as f32) / self.scale) as f64,
            ((y - self.pad_y as f32) / self.scale) as f64,
        )
    }
}

/// Post-processing knobs for raw YOLO output
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

/// Decode a YOLOv8 output tensor into frame-space regions.
///
/// Accepts `[1, 4 + nc, N]` (the default export) or its transpose
/// `[1, N, 4 + nc]`. Each anchor is `cx, cy, w, h` in input pixels followed by
/// per-class scores. Output is NMS-filtered and sorted by confidence.
pub fn decode_yolo_output(
    dims: &[usize],
    data: &[f32],
    letterbox: &Letterbox,
    frame_width: u32,
    frame_height: u32,
    params: &DecodeParams,
) -> DetectionResult<Vec<Region>> {
    if dims.len() != 3 || dims[0] != 1 {
        return Err(DetectionError::UnexpectedOutput(dims.to_vec()));
    }

    // Attributes are the short axis: 4 + nc is far below the anchor count
    let transposed = dims[1] > dims[2];
    let (attributes, anchors) = if transposed {
        (dims[2], dims[1])
    } else {
        (dims[1], dims[2])
    };

    if attributes <= 4 || data.len() < attributes * anchors {
        return Err(DetectionError::UnexpectedOutput(dims.to_vec()));
    }

    let num_classes = attributes - 4;
    if num_classes > FALLBACK_CLASS as usize {
        return Err(DetectionError::LabelSpaceOverlap {
            num_classes,
            reserved: FALLBACK_CLASS,
        });
    }

    let value = |attr: usize, anchor: usize| -> f32 {
        if transposed {
            data[anchor * attributes + attr]
        } else {
            data[attr * anchors + anchor]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = value(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }

        if best_score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (
            value(0, anchor),
            value(1, anchor),
            value(2, anchor),
            value(3, anchor),
        );
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
        let bbox = BoundingBox::new(x1, y1, x2, y2).clipped(frame_width, frame_height);

        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            trace!("Dropping degenerate box for anchor {}", anchor);
            continue;
        }

        candidates.push(Region::new(bbox, best_score as f64, best_class as i32));
    }

    trace!("{} candidates above threshold {:.2}", candidates.len(), params.confidence_threshold);
    Ok(nms(candidates, params.iou_threshold as f64, params.max_detections))
}

/// Class-aware non-maximum suppression; result sorted by confidence, descending.
pub fn nms(detections: Vec<Region>, iou_threshold: f64, max_detections: usize) -> Vec<Region> {
    if detections.is_empty() {
        return vec![];
    }

    let mut sorted = detections;
    sorted.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        if keep.len() == max_detections {
            break;
        }

        keep.push(sorted[i]);

        for j in (i + 1)..sorted.len() {
            if !suppressed[j]
                && sorted[j].class_id == sorted[i].class_id
                && sorted[i].bbox.iou(&sorted[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }

    debug!("NMS: kept {}/{} detections", keep.len(), sorted.len());
    keep
}

/// YOLOv8 detector backed by a pool of ONNX Runtime sessions
pub struct OnnxDetector {
    pool: OnnxSessionPool,
    target_size: u32,
    iou_threshold: f32,
    max_detections: usize,
}

impl OnnxDetector {
    /// Load the model and run one warm-up inference to validate its output layout
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let pool = OnnxSessionPool::build(Path::new(&config.model_path), "detector", config.pool_size)?;

        let detector = Self {
            pool,
            target_size: config.target_size,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        };

        let warmup = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([LETTERBOX_FILL; 3])));
        detector
            .detect(&warmup, 1.0)
            .context("Detector warm-up inference failed")?;

        info!(
            "✓ Detector ready: input {}x{}, {}/{} sessions idle",
            config.target_size,
            config.target_size,
            detector.pool.available(),
            detector.pool.capacity()
        );
        Ok(detector)
    }

    fn preprocess(&self, img: &DynamicImage, letterbox: &Letterbox) -> Array4<f32> {
        let target = self.target_size;
        trace!(
            "Preprocessing image: {}x{} → {}x{} (scale {:.3})",
            img.width(),
            img.height(),
            target,
            target,
            letterbox.scale
        );

        let resized = img
            .resize_exact(
                letterbox.resized_width,
                letterbox.resized_height,
                FilterType::Triangle,
            )
            .to_rgb8();

        let mut canvas = RgbImage::from_pixel(target, target, Rgb([LETTERBOX_FILL; 3]));
        image::imageops::replace(
            &mut canvas,
            &resized,
            letterbox.pad_x as i64,
            letterbox.pad_y as i64,
        );

        let side = target as usize;
        let mut array = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            array[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            array[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        array
    }
}

impl Detector for OnnxDetector {
    fn detect(
        &self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> DetectionResult<Vec<Region>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::InvalidImageSize { width, height });
        }

        let start = std::time::Instant::now();
        let letterbox = Letterbox::new(width, height, self.target_size);
        let tensor = self.preprocess(image, &letterbox);

        let shape: [usize; 4] = [1, 3, self.target_size as usize, self.target_size as usize];
        let (data, _offset) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape, data))?;

        // Extract data while the session is held, then release it
        let (dims, output) = {
            trace!("{} of {} detector sessions idle", self.pool.available(), self.pool.capacity());
            let mut session = self
                .pool
                .acquire()
                .map_err(|e| DetectionError::SessionUnavailable(e.to_string()))?;
            let outputs = session.run(ort::inputs!["images" => input])?;

            let (shape, data) = if let Some(output) = outputs.get("output0") {
                output.try_extract_tensor::<f32>()?
            } else {
                let first_key = outputs
                    .keys()
                    .next()
                    .ok_or_else(|| DetectionError::UnexpectedOutput(vec![]))?;
                outputs[first_key].try_extract_tensor::<f32>()?
            };

            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            (dims, data.to_vec())
        };

        debug!(
            "✓ Detector inference completed in {:.2}ms, output {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            dims
        );

        decode_yolo_output(
            &dims,
            &output,
            &letterbox,
            width,
            height,
            &DecodeParams {
                confidence_threshold,
                iou_threshold: self.iou_threshold,
                max_detections: self.max_detections,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DecodeParams {
        DecodeParams {
            confidence_threshold: 0.1,
            iou_threshold: 0.7,
            max_detections: 300,
        }
    }

    /// Lay anchors out as `[1, 4 + nc, N]`
    fn yolo_tensor(anchors: &[[f32; 6]]) -> (Vec<usize>, Vec<f32>) {
        let attributes = 6;
        let n = anchors.len();
        let mut data = vec![0.0; attributes * n];
        for (a, values) in anchors.iter().enumerate() {
            for (attr, v) in values.iter().enumerate() {
                data[attr * n + a] = *v;
            }
        }
        (vec![1, attributes, n], data)
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::new(1280, 640, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.resized_width, lb.resized_height), (640, 320));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 160));
        assert_eq!(lb.unmap(100.0, 260.0), (200.0, 200.0));
    }

    #[test]
    fn test_decode_filters_and_maps_boxes() {
        let lb = Letterbox::new(640, 640, 640);
        let (dims, data) = yolo_tensor(&[
            // cx, cy, w, h, class0, class1
            [100.0, 100.0, 40.0, 20.0, 0.05, 0.9],
            [300.0, 300.0, 50.0, 50.0, 0.02, 0.03],
        ]);

        let regions = decode_yolo_output(&dims, &data, &lb, 640, 640, &params()).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].class_id, 1);
        assert!((regions[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(regions[0].bbox, BoundingBox::new(80.0, 90.0, 120.0, 110.0));
    }

    #[test]
    fn test_decode_transposed_layout() {
        let lb = Letterbox::new(640, 640, 640);
        // [1, N, 4 + nc] with N = 8 anchors, only the first one scores
        let mut data = vec![0.0f32; 8 * 6];
        data[..6].copy_from_slice(&[50.0, 50.0, 20.0, 20.0, 0.7, 0.1]);
        let regions =
            decode_yolo_output(&[1, 8, 6], &data, &lb, 640, 640, &params()).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].class_id, 0);
    }

    #[test]
    fn test_decode_clips_to_frame() {
        let lb = Letterbox::new(640, 640, 640);
        let (dims, data) = yolo_tensor(&[[5.0, 630.0, 40.0, 40.0, 0.5, 0.0]]);
        let regions = decode_yolo_output(&dims, &data, &lb, 640, 640, &params()).unwrap();
        assert_eq!(regions[0].bbox, BoundingBox::new(0.0, 610.0, 25.0, 640.0));
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let lb = Letterbox::new(640, 640, 640);
        let result = decode_yolo_output(&[1, 4, 10], &[0.0; 40], &lb, 640, 640, &params());
        assert!(matches!(result, Err(DetectionError::UnexpectedOutput(_))));
    }

    #[test]
    fn test_decode_rejects_label_space_overlap() {
        let lb = Letterbox::new(640, 640, 640);
        let attributes = 4 + 100;
        let anchors = 200;
        let data = vec![0.0; attributes * anchors];
        let result = decode_yolo_output(&[1, attributes, anchors], &data, &lb, 640, 640, &params());
        assert!(matches!(
            result,
            Err(DetectionError::LabelSpaceOverlap { num_classes: 100, .. })
        ));
    }

    #[test]
    fn test_nms_is_class_aware() {
        let a = Region::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 0);
        let b = Region::new(BoundingBox::new(0.0, 0.0, 10.0, 10.5), 0.8, 0);
        let c = Region::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.7, 1);

        let kept = nms(vec![c, b, a], 0.7, 300);
        assert_eq!(kept, vec![a, c]);
    }

    #[test]
    fn test_nms_caps_output() {
        let regions: Vec<Region> = (0..5)
            .map(|i| {
                let x = i as f64 * 20.0;
                Region::new(BoundingBox::new(x, 0.0, x + 10.0, 10.0), 0.5, 0)
            })
            .collect();
        assert_eq!(nms(regions, 0.7, 3).len(), 3);
    }
}
