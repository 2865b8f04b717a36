//! Frame preprocessing: size capping and low-light enhancement.
//!
//! Dark frames get local contrast equalization (CLAHE) on the luminance
//! channel only, then a gamma boost, then a light median denoise. Bright
//! frames pass through untouched apart from the size cap.

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::frame::{downscale_to_fit, MAX_FRAME_DIMENSION};

/// Preprocessing parameters.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Long edge above which frames are downscaled first
    pub max_dimension: u32,
    /// Mean luma (0-255) below which a frame counts as low-light
    pub low_light_threshold: f32,
    /// CLAHE clip limit, relative to a uniform histogram
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid size per axis
    pub clahe_grid: u32,
    /// Gamma applied to dark frames (> 1 brightens)
    pub gamma: f32,
    /// Apply a 3x3 median filter after enhancement
    pub denoise: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_dimension: MAX_FRAME_DIMENSION,
            low_light_threshold: 100.0,
            clahe_clip_limit: 2.0,
            clahe_grid: 8,
            gamma: 1.5,
            denoise: true,
        }
    }
}

/// Result of [`FramePreprocessor::enhance`].
#[derive(Debug, Clone)]
pub struct EnhancedFrame {
    pub image: RgbImage,
    /// Factor applied by the size cap; divide coordinates by it to map back
    pub scale: f32,
    /// Whether low-light enhancement ran
    pub enhanced: bool,
}

impl EnhancedFrame {
    /// Multiplier taking enhanced-frame coordinates to original-frame coordinates.
    pub fn to_original(&self) -> f32 {
        1.0 / self.scale
    }
}

/// Normalizes frames before detection.
#[derive(Debug, Clone, Default)]
pub struct FramePreprocessor {
    config: PreprocessConfig,
}

impl FramePreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Enhance a frame. Never fails for a decoded frame.
    pub fn enhance(&self, frame: &RgbImage) -> EnhancedFrame {
        let (mut image, scale) = downscale_to_fit(frame, self.config.max_dimension);

        let luma = mean_luminance(&image);
        if luma >= self.config.low_light_threshold {
            return EnhancedFrame {
                image,
                scale,
                enhanced: false,
            };
        }

        debug!(
            mean_luma = luma,
            threshold = self.config.low_light_threshold,
            "Low-light frame, applying enhancement"
        );

        equalize_luminance(&mut image, self.config.clahe_clip_limit, self.config.clahe_grid);
        apply_gamma(&mut image, self.config.gamma);
        if self.config.denoise {
            image = median_3x3(&image);
        }

        EnhancedFrame {
            image,
            scale,
            enhanced: true,
        }
    }
}

fn luma_of(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// Mean BT.601 luma of a frame in 0-255.
pub fn mean_luminance(frame: &RgbImage) -> f32 {
    let count = (frame.width() as u64 * frame.height() as u64).max(1);
    let sum: f64 = frame.pixels().map(|p| luma_of(p) as f64).sum();
    (sum / count as f64) as f32
}

/// Run CLAHE on the Y channel of YCbCr and write the result back as RGB.
fn equalize_luminance(frame: &mut RgbImage, clip_limit: f32, grid: u32) {
    let (w, h) = frame.dimensions();
    let mut y_plane = Vec::with_capacity((w * h) as usize);
    let mut chroma = Vec::with_capacity((w * h) as usize);

    for p in frame.pixels() {
        let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        y_plane.push(y.round().clamp(0.0, 255.0) as u8);
        chroma.push((cb, cr));
    }

    let equalized = clahe(&y_plane, w, h, clip_limit, grid);

    for (i, p) in frame.pixels_mut().enumerate() {
        let y = equalized[i] as f32;
        let (cb, cr) = chroma[i];
        let r = y + 1.402 * (cr - 128.0);
        let g = y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
        let b = y + 1.772 * (cb - 128.0);
        *p = Rgb([to_u8(r), to_u8(g), to_u8(b)]);
    }
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Contrast-limited adaptive histogram equalization of an 8-bit plane,
/// with bilinear interpolation between tile mappings.
fn clahe(plane: &[u8], width: u32, height: u32, clip_limit: f32, grid: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let tiles_x = (grid as usize).clamp(1, w.max(1));
    let tiles_y = (grid as usize).clamp(1, h.max(1));
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[plane[y * w + x] as usize] += 1;
                    count += 1;
                }
            }
            luts[ty * tiles_x + tx] = tile_mapping(&mut hist, count, clip_limit);
        }
    }

    let mut out = vec![0u8; plane.len()];
    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = (fy.floor().max(0.0) as usize).min(tiles_y - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let ay = (fy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = (fx.floor().max(0.0) as usize).min(tiles_x - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let ax = (fx - tx0 as f32).clamp(0.0, 1.0);

            let v = plane[y * w + x] as usize;
            let tl = luts[ty0 * tiles_x + tx0][v] as f32;
            let tr = luts[ty0 * tiles_x + tx1][v] as f32;
            let bl = luts[ty1 * tiles_x + tx0][v] as f32;
            let br = luts[ty1 * tiles_x + tx1][v] as f32;

            let top = tl + (tr - tl) * ax;
            let bottom = bl + (br - bl) * ax;
            out[y * w + x] = to_u8(top + (bottom - top) * ay);
        }
    }
    out
}

/// Clip a tile histogram, redistribute the excess and build its CDF mapping.
fn tile_mapping(hist: &mut [u32; 256], count: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if count == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let limit = ((clip_limit * count as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let per_bin = excess / 256;
    let mut residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        let mut i = 0;
        while residual > 0 && i < 256 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }

    let scale = 255.0 / count as f32;
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = to_u8(cdf as f32 * scale);
    }
    lut
}

/// Apply `out = 255 * (in / 255)^(1 / gamma)` through a lookup table.
fn apply_gamma(frame: &mut RgbImage, gamma: f32) {
    if gamma <= 0.0 || (gamma - 1.0).abs() < f32::EPSILON {
        return;
    }
    let inv = 1.0 / gamma;
    let mut table = [0u8; 256];
    for (i, v) in table.iter_mut().enumerate() {
        *v = to_u8(255.0 * (i as f32 / 255.0).powf(inv));
    }
    for p in frame.pixels_mut() {
        for c in 0..3 {
            p[c] = table[p[c] as usize];
        }
    }
}

/// 3x3 per-channel median with clamped edges.
fn median_3x3(frame: &RgbImage) -> RgbImage {
    let (w, h) = frame.dimensions();
    let mut out = RgbImage::new(w, h);
    let mut window = [0u8; 9];

    for y in 0..h {
        for x in 0..w {
            let mut px = [0u8; 3];
            for (c, slot) in px.iter_mut().enumerate() {
                let mut n = 0;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                        let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                        window[n] = frame.get_pixel(sx, sy)[c];
                        n += 1;
                    }
                }
                window.sort_unstable();
                *slot = window[4];
            }
            out.put_pixel(x, y, Rgb(px));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32, max: u8) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = ((x + y) % (max as u32 + 1)) as u8;
            Rgb([v, v / 2 + 5, v / 3 + 10])
        })
    }

    #[test]
    fn test_bright_frame_is_untouched() {
        let frame = RgbImage::from_fn(64, 48, |x, _| Rgb([150 + (x % 50) as u8, 180, 200]));
        let out = FramePreprocessor::default().enhance(&frame);
        assert!(!out.enhanced);
        assert_eq!(out.scale, 1.0);
        assert_eq!(out.image, frame);
    }

    #[test]
    fn test_dark_frame_is_brightened() {
        let frame = gradient(96, 64, 60);
        let before = mean_luminance(&frame);
        assert!(before < 100.0);

        let out = FramePreprocessor::default().enhance(&frame);
        assert!(out.enhanced);
        assert_eq!(out.image.dimensions(), frame.dimensions());
        assert_ne!(out.image, frame);
        assert!(mean_luminance(&out.image) > before);
    }

    #[test]
    fn test_large_bright_frame_only_downscaled() {
        let frame = RgbImage::from_pixel(2000, 1000, Rgb([220, 220, 220]));
        let out = FramePreprocessor::default().enhance(&frame);
        assert!(!out.enhanced);
        assert_eq!(out.image.dimensions(), (1280, 640));
        assert!((out.to_original() - 2000.0 / 1280.0).abs() < 1e-4);
    }

    #[test]
    fn test_enhance_does_not_mutate_input() {
        let frame = gradient(32, 32, 40);
        let copy = frame.clone();
        let _ = FramePreprocessor::default().enhance(&frame);
        assert_eq!(frame, copy);
    }

    #[test]
    fn test_tiny_frame_survives() {
        let frame = RgbImage::from_pixel(1, 1, Rgb([5, 5, 5]));
        let out = FramePreprocessor::default().enhance(&frame);
        assert_eq!(out.image.dimensions(), (1, 1));
    }

    #[test]
    fn test_gamma_brightens_midtones() {
        let mut frame = RgbImage::from_pixel(2, 2, Rgb([64, 64, 64]));
        apply_gamma(&mut frame, 1.5);
        assert!(frame.get_pixel(0, 0)[0] > 64);
    }

    #[test]
    fn test_median_removes_speck() {
        let mut frame = RgbImage::from_pixel(5, 5, Rgb([10, 10, 10]));
        frame.put_pixel(2, 2, Rgb([255, 255, 255]));
        let out = median_3x3(&frame);
        assert_eq!(out.get_pixel(2, 2), &Rgb([10, 10, 10]));
    }
}
