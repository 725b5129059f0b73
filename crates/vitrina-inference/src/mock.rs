//! Deterministic image encoders for testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vitrina_inference::mock::{test_image_png, PixelEncoder};
//! use vitrina_inference::EmbeddingExtractor;
//!
//! let extractor = EmbeddingExtractor::new(Arc::new(PixelEncoder::new(512)));
//! let embedding = extractor.extract(&test_image_png(64, 48, 1)).await;
//! assert_eq!(embedding.unwrap().dimension(), 512);
//! ```

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbImage};

use vitrina_core::{Error, ImageEncoder, Result};

use crate::normalize::flatten_on_white;

const THUMBNAIL_EDGE: u32 = 16;

/// Encoder deriving a vector from a 16×16 thumbnail of the image.
///
/// Similar pictures give similar vectors; identical bytes give identical
/// vectors.
#[derive(Clone)]
pub struct PixelEncoder {
    dimension: usize,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl PixelEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every encode call, for exercising timeouts and races.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageEncoder for PixelEncoder {
    async fn encode(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let decoded =
            image::load_from_memory(image).map_err(|e| Error::Unprocessable(e.to_string()))?;
        let thumb = imageops::resize(
            &flatten_on_white(&decoded),
            THUMBNAIL_EDGE,
            THUMBNAIL_EDGE,
            FilterType::Triangle,
        );

        let mut out = vec![0.0f32; self.dimension];
        for (i, channel) in thumb.as_raw().iter().enumerate() {
            out[i % self.dimension] += *channel as f32 / 255.0 - 0.5;
        }
        // keeps flat mid-gray images away from the zero vector
        out[0] += 1e-3;
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-pixel"
    }
}

/// Encoder returning a settable vector regardless of input.
#[derive(Clone)]
pub struct FixedEncoder {
    vector: Arc<Mutex<Vec<f32>>>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl FixedEncoder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector: Arc::new(Mutex::new(vector)),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replace the vector returned by subsequent calls.
    pub fn set(&self, vector: Vec<f32>) {
        *self.vector.lock().unwrap_or_else(|p| p.into_inner()) = vector;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn current(&self) -> Vec<f32> {
        self.vector
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl ImageEncoder for FixedEncoder {
    async fn encode(&self, _image: &[u8]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.current())
    }

    fn dimension(&self) -> usize {
        self.current().len()
    }

    fn model_name(&self) -> &str {
        "mock-fixed"
    }
}

/// Encoder that always fails with `ModelUnavailable`.
#[derive(Debug, Clone)]
pub struct FailingEncoder {
    dimension: usize,
}

impl FailingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl ImageEncoder for FailingEncoder {
    async fn initialize(&self) -> Result<()> {
        Err(Error::ModelUnavailable("mock encoder is offline".to_string()))
    }

    async fn encode(&self, _image: &[u8]) -> Result<Vec<f32>> {
        Err(Error::ModelUnavailable("mock encoder is offline".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-failing"
    }
}

/// Generate a PNG whose content is determined by `seed`.
pub fn test_image_png(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let s = seed as u32;
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            ((x * (s + 1) * 3) % 256) as u8,
            ((y * (s % 7 + 1) * 5) % 256) as u8,
            (((x + y) * (s % 5 + 2)) % 256) as u8,
        ])
    });
    let mut out = Vec::new();
    // writing into an in-memory buffer cannot fail for a valid RGB image
    let _ = DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut out), ImageFormat::Png);
    out
}
