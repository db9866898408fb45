use image::{DynamicImage, GenericImageView};

use crate::core::errors::{DecodeError, DecodeResult};
use crate::core::types::BoundingBox;

/// Decode raw encoded bytes (format guessed from content) into a pixel grid.
pub fn decode_frame(bytes: &[u8]) -> DecodeResult<DynamicImage> {
    let img = image::load_from_memory(bytes)?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyImage { width, height });
    }
    Ok(img)
}

/// Integer pixel window `(x, y, width, height)` for a box inside a `width x height` frame.
///
/// Coordinates are truncated toward zero and clamped to the frame, so a box
/// partly outside is cut down and a box fully outside yields `None`.
pub fn crop_window(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clamp = |v: f64, max: u32| -> u32 { (v as i64).clamp(0, max as i64) as u32 };

    let x1 = clamp(bbox.x1, width);
    let y1 = clamp(bbox.y1, height);
    let x2 = clamp(bbox.x2, width);
    let y2 = clamp(bbox.y2, height);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some((x1, y1, x2 - x1, y2 - y1))
}

/// Crop `img` to `bbox`, or `None` when the clamped crop has zero area.
pub fn crop_to_box(img: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (width, height) = img.dimensions();
    crop_window(bbox, width, height).map(|(x, y, w, h)| img.crop_imm(x, y, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([255, 0, 0, 255]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png() {
        let img = decode_frame(&png_bytes(64, 32)).unwrap();
        assert_eq!(img.dimensions(), (64, 32));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_frame(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::InvalidImage(_))));
    }

    #[test]
    fn test_crop_window_truncates() {
        let bbox = BoundingBox::new(10.9, 10.2, 50.7, 30.99);
        assert_eq!(crop_window(&bbox, 100, 100), Some((10, 10, 40, 20)));
    }

    #[test]
    fn test_crop_window_clamps_partial_overlap() {
        let bbox = BoundingBox::new(-20.0, 90.0, 40.0, 140.0);
        assert_eq!(crop_window(&bbox, 100, 100), Some((0, 90, 40, 10)));
    }

    #[test]
    fn test_crop_window_outside_frame() {
        let bbox = BoundingBox::new(120.0, 10.0, 180.0, 40.0);
        assert_eq!(crop_window(&bbox, 100, 100), None);

        let degenerate = BoundingBox::new(30.0, 30.0, 30.4, 60.0);
        assert_eq!(crop_window(&degenerate, 100, 100), None);
    }

    #[test]
    fn test_crop_to_box_dimensions() {
        let img = decode_frame(&png_bytes(100, 60)).unwrap();
        let crop = crop_to_box(&img, &BoundingBox::new(10.0, 10.0, 50.0, 30.0)).unwrap();
        assert_eq!(crop.dimensions(), (40, 20));
    }
}
