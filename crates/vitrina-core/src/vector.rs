//! Embedding vectors: construction, persisted byte layout, and similarity math.
//!
//! Stored layout is a raw little-endian `f32` buffer of `dimension * 4`
//! bytes. Anything else decodes to [`Error::CorruptVector`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Norm deviation below which a vector is already considered unit length.
const UNIT_EPSILON: f32 = 1e-6;

/// L2-unit-normalized embedding.
///
/// Construction rejects empty, zero and non-finite vectors, so a value of
/// this type always has norm ≈ 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// Build a unit vector, re-normalizing when the norm has drifted.
    pub fn new(mut values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidInput("empty embedding".to_string()));
        }
        if !normalize_in_place(&mut values) {
            return Err(Error::InvalidInput(
                "embedding has zero or non-finite norm".to_string(),
            ));
        }
        Ok(Self(values))
    }

    /// Decode a stored buffer, checking it against the expected dimension.
    pub fn from_le_bytes(bytes: &[u8], dimension: usize) -> Result<Self> {
        let values = decode_f32_le(bytes, dimension)?;
        Self::new(values).map_err(|e| Error::CorruptVector(e.to_string()))
    }

    /// Encode to the persisted little-endian layout.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        encode_f32_le(&self.0)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Cosine similarity with another unit vector (a plain dot product).
    pub fn similarity(&self, other: &EmbeddingVector) -> f32 {
        dot(&self.0, &other.0)
    }
}

impl TryFrom<Vec<f32>> for EmbeddingVector {
    type Error = Error;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<EmbeddingVector> for Vec<f32> {
    fn from(v: EmbeddingVector) -> Self {
        v.0
    }
}

impl AsRef<[f32]> for EmbeddingVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Decode a little-endian `f32` buffer of exactly `dimension` elements.
pub fn decode_f32_le(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::CorruptVector(format!(
            "byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let count = bytes.len() / 4;
    if count != dimension {
        return Err(Error::CorruptVector(format!(
            "expected {} elements, found {}",
            dimension, count
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encode floats as a little-endian byte buffer.
pub fn encode_f32_le(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize in place and return whether the norm was usable.
///
/// Vectors already within `1e-6` of unit length are left untouched so that
/// normalization is idempotent bit for bit.
pub fn normalize_in_place(values: &mut [f32]) -> bool {
    let norm = l2_norm(values);
    if !norm.is_finite() || norm <= f32::EPSILON {
        return false;
    }
    if (norm - 1.0).abs() > UNIT_EPSILON {
        values.iter_mut().for_each(|x| *x /= norm);
    }
    true
}

/// Cosine similarity for vectors of any norm; 0.0 when either is degenerate
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mag_a = l2_norm(a);
    let mag_b = l2_norm(b);
    if mag_a > 0.0 && mag_b > 0.0 {
        dot(a, b) / (mag_a * mag_b)
    } else {
        0.0
    }
}
