//! Image normalization ahead of embedding extraction.
//!
//! Photos arrive in any common encoding and colour mode. Normalization makes
//! them comparable: flatten to RGB over white, optionally equalize luma
//! contrast with CLAHE, bound the longer edge, and re-encode as JPEG. The
//! pipeline is deterministic for identical input and configuration.

use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use tracing::{debug, warn};

use vitrina_core::defaults::{
    self, env_flag, env_or, CLAHE_CLIP_LIMIT, CLAHE_TILE_GRID, NORMALIZE_JPEG_QUALITY,
    NORMALIZE_MAX_EDGE,
};

/// Result of normalization: either freshly re-encoded bytes or the original
/// input when any step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedImage {
    Normalized(Vec<u8>),
    Unchanged(Vec<u8>),
}

impl NormalizedImage {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Normalized(b) | Self::Unchanged(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Normalized(b) | Self::Unchanged(b) => b,
        }
    }

    pub fn is_normalized(&self) -> bool {
        matches!(self, Self::Normalized(_))
    }
}

/// Normalizer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerConfig {
    /// Longest edge after downscaling. Images are never upscaled.
    pub max_edge: u32,
    /// Apply CLAHE to the luma channel.
    pub enhance_contrast: bool,
    /// CLAHE clip limit, as a multiple of the uniform bin height.
    pub clip_limit: f32,
    /// CLAHE tiles per axis.
    pub tile_grid: u32,
    pub jpeg_quality: u8,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_edge: NORMALIZE_MAX_EDGE,
            enhance_contrast: true,
            clip_limit: CLAHE_CLIP_LIMIT,
            tile_grid: CLAHE_TILE_GRID,
            jpeg_quality: NORMALIZE_JPEG_QUALITY,
        }
    }
}

impl NormalizerConfig {
    pub fn from_env() -> Self {
        Self {
            max_edge: env_or(defaults::ENV_NORMALIZE_MAX_EDGE, NORMALIZE_MAX_EDGE).max(1),
            enhance_contrast: env_flag(defaults::ENV_NORMALIZE_CONTRAST, true),
            jpeg_quality: env_or(defaults::ENV_NORMALIZE_JPEG_QUALITY, NORMALIZE_JPEG_QUALITY)
                .clamp(1, 100),
            ..Self::default()
        }
    }

    pub fn with_max_edge(mut self, max_edge: u32) -> Self {
        self.max_edge = max_edge.max(1);
        self
    }

    pub fn with_contrast(mut self, enabled: bool) -> Self {
        self.enhance_contrast = enabled;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}

/// Stateless, CPU-bound image normalizer.
#[derive(Debug, Clone, Default)]
pub struct ImageNormalizer {
    config: NormalizerConfig,
}

impl ImageNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize raw image bytes. Never fails: on any error the original
    /// bytes come back as [`NormalizedImage::Unchanged`].
    pub fn normalize(&self, bytes: &[u8]) -> NormalizedImage {
        let start = Instant::now();
        match self.try_normalize(bytes) {
            Ok(out) => {
                debug!(
                    subsystem = "inference",
                    component = "normalizer",
                    op = "normalize",
                    image_bytes = bytes.len(),
                    output_bytes = out.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Image normalized"
                );
                NormalizedImage::Normalized(out)
            }
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "normalizer",
                    op = "normalize",
                    image_bytes = bytes.len(),
                    error = %e,
                    "Normalization failed, using original bytes"
                );
                NormalizedImage::Unchanged(bytes.to_vec())
            }
        }
    }

    fn try_normalize(&self, bytes: &[u8]) -> image::ImageResult<Vec<u8>> {
        let decoded = image::load_from_memory(bytes)?;
        let mut rgb = flatten_on_white(&decoded);

        if self.config.enhance_contrast {
            equalize_luma(&mut rgb, self.config.clip_limit, self.config.tile_grid);
        }

        let rgb = downscale(rgb, self.config.max_edge);

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.config.jpeg_quality).encode_image(&rgb)?;
        Ok(out)
    }
}

/// Convert to 8-bit RGB, compositing any alpha channel over white.
pub fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u32;
        let over = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([over(r), over(g), over(b)])
    })
}

/// Downscale so the longer edge is at most `max_edge`, keeping aspect ratio.
pub fn downscale(rgb: RgbImage, max_edge: u32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let longest = w.max(h);
    if longest <= max_edge {
        return rgb;
    }
    let scale = max_edge as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).clamp(1, max_edge);
    let nh = ((h as f64 * scale).round() as u32).clamp(1, max_edge);
    imageops::resize(&rgb, nw, nh, FilterType::Lanczos3)
}

fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// CLAHE on the YCbCr luma plane.
///
/// Adding the luma delta to every channel leaves Cb and Cr unchanged.
pub fn equalize_luma(rgb: &mut RgbImage, clip_limit: f32, tile_grid: u32) {
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return;
    }

    let y_plane = GrayImage::from_fn(w, h, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        image::Luma([luma(r, g, b).round().clamp(0.0, 255.0) as u8])
    });
    let equalized = clahe(&y_plane, clip_limit, tile_grid);

    for (x, y, px) in rgb.enumerate_pixels_mut() {
        let [r, g, b] = px.0;
        let delta = equalized.get_pixel(x, y).0[0] as f32 - luma(r, g, b);
        let shift = |c: u8| (c as f32 + delta).round().clamp(0.0, 255.0) as u8;
        px.0 = [shift(r), shift(g), shift(b)];
    }
}

/// Contrast-limited adaptive histogram equalization of a grayscale image.
///
/// Per-tile lookup tables from clipped histograms, blended bilinearly
/// between the four nearest tile centers.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let tiles_x = tile_grid.clamp(1, w.max(1)) as usize;
    let tiles_y = tile_grid.clamp(1, h.max(1)) as usize;

    let bounds = |i: usize, tiles: usize, len: u32| {
        let len = len as usize;
        (i * len / tiles, (i + 1) * len / tiles)
    };

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        let (y0, y1) = bounds(ty, tiles_y, h);
        for tx in 0..tiles_x {
            let (x0, x1) = bounds(tx, tiles_x, w);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            luts[ty * tiles_x + tx] = tile_lut(&mut hist, area, clip_limit);
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;
    let neighbours = |pos: u32, tile: f32, tiles: usize| {
        let f = ((pos as f32 + 0.5) / tile - 0.5).max(0.0);
        let i0 = (f.floor() as usize).min(tiles - 1);
        let i1 = (i0 + 1).min(tiles - 1);
        let a = (f - i0 as f32).clamp(0.0, 1.0);
        (i0, i1, a)
    };

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y).0[0] as usize;
        let (tx0, tx1, ax) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, tiles_y);
        let at = |tx: usize, ty: usize| luts[ty * tiles_x + tx][v] as f32;
        let top = at(tx0, ty0) * (1.0 - ax) + at(tx1, ty0) * ax;
        let bottom = at(tx0, ty1) * (1.0 - ax) + at(tx1, ty1) * ax;
        let out = top * (1.0 - ay) + bottom * ay;
        image::Luma([out.round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let per_bin = excess / 256;
        let residual = (excess % 256) as usize;
        for bin in hist.iter_mut() {
            *bin += per_bin;
        }
        if residual > 0 {
            let step = (256 / residual).max(1);
            for i in (0..256).step_by(step).take(residual) {
                hist[i] += 1;
            }
        }
    }

    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
