//! Frame decode, crop, resize and encode helpers.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, RgbImage};
use sid_models::BoundingBox;

use crate::error::{VisionError, VisionResult};

/// Longest edge allowed before a frame is downscaled.
pub const MAX_FRAME_DIMENSION: u32 = 1280;

/// JPEG quality used for persisted evidence frames.
pub const EVIDENCE_JPEG_QUALITY: u8 = 80;

/// Decode an uploaded image into an RGB frame.
///
/// Fails on undecodable bytes and on images with zero area.
pub fn decode_frame(bytes: &[u8]) -> VisionResult<RgbImage> {
    if bytes.is_empty() {
        return Err(VisionError::invalid_image("empty image payload"));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| VisionError::invalid_image(format!("failed to decode image: {}", e)))?
        .to_rgb8();

    if img.width() == 0 || img.height() == 0 {
        return Err(VisionError::invalid_image("image has zero area"));
    }

    Ok(img)
}

/// Scale factor that brings the long edge of `width` x `height` down to `max_dim`.
///
/// Returns 1.0 when the frame already fits.
pub fn downscale_factor(width: u32, height: u32, max_dim: u32) -> f32 {
    let long_edge = width.max(height);
    if long_edge <= max_dim || long_edge == 0 {
        1.0
    } else {
        max_dim as f32 / long_edge as f32
    }
}

/// Downscale so the long edge is at most `max_dim`, preserving aspect ratio.
///
/// Returns the frame and the factor applied (1.0 when untouched).
pub fn downscale_to_fit(frame: &RgbImage, max_dim: u32) -> (RgbImage, f32) {
    let factor = downscale_factor(frame.width(), frame.height(), max_dim);
    if factor >= 1.0 {
        return (frame.clone(), 1.0);
    }

    let w = ((frame.width() as f32 * factor).round() as u32).max(1);
    let h = ((frame.height() as f32 * factor).round() as u32).max(1);
    (imageops::resize(frame, w, h, FilterType::Triangle), factor)
}

/// Crop the pixels covered by `bbox`, clamped to the frame.
///
/// Returns `None` when nothing of the box remains inside the frame.
pub fn crop_box(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let clamped = bbox.clamp(frame.width(), frame.height());
    if !clamped.is_valid() {
        return None;
    }

    let x = clamped.x1.floor() as u32;
    let y = clamped.y1.floor() as u32;
    let x2 = (clamped.x2.ceil() as u32).min(frame.width());
    let y2 = (clamped.y2.ceil() as u32).min(frame.height());
    if x2 <= x || y2 <= y {
        return None;
    }

    Some(imageops::crop_imm(frame, x, y, x2 - x, y2 - y).to_image())
}

/// Encode a frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> VisionResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8)
        .map_err(|e| VisionError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

/// Bound an annotated frame for upload: downscale to [`MAX_FRAME_DIMENSION`]
/// and encode at [`EVIDENCE_JPEG_QUALITY`].
pub fn encode_evidence(frame: &RgbImage) -> VisionResult<Vec<u8>> {
    let (bounded, _) = downscale_to_fit(frame, MAX_FRAME_DIMENSION);
    encode_jpeg(&bounded, EVIDENCE_JPEG_QUALITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_frame(b"not an image"),
            Err(VisionError::InvalidImage(_))
        ));
        assert!(matches!(decode_frame(&[]), Err(VisionError::InvalidImage(_))));
    }

    #[test]
    fn test_jpeg_roundtrip_dimensions() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&frame, 80).unwrap();
        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_downscale_preserves_aspect() {
        let frame = RgbImage::new(2560, 1440);
        let (small, factor) = downscale_to_fit(&frame, 1280);
        assert_eq!(small.dimensions(), (1280, 720));
        assert!((factor - 0.5).abs() < 1e-6);

        let frame = RgbImage::new(640, 480);
        let (same, factor) = downscale_to_fit(&frame, 1280);
        assert_eq!(same.dimensions(), (640, 480));
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn test_crop_box_clamps() {
        let frame = RgbImage::new(100, 100);
        let crop = crop_box(&frame, &BoundingBox::new(-10.0, 50.0, 30.0, 150.0)).unwrap();
        assert_eq!(crop.dimensions(), (30, 50));
        assert!(crop_box(&frame, &BoundingBox::new(120.0, 0.0, 150.0, 10.0)).is_none());
    }

    #[test]
    fn test_encode_evidence_bounds_size() {
        let frame = RgbImage::new(1920, 1080);
        let decoded = decode_frame(&encode_evidence(&frame).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (1280, 720));
    }
}
