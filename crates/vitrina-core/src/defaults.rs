//! Centralized default constants for the vitrina system.
//!
//! **This module is the single source of truth** for shared default values
//! and the environment variable names that override them. Crates reference
//! these constants instead of defining their own magic numbers.

// =============================================================================
// EMBEDDING
// =============================================================================

/// Embedding vector dimension (CLIP ViT-B/32 image tower).
pub const EMBED_DIMENSION: usize = 512;

/// Default image encoder model name.
pub const ENCODER_MODEL: &str = "clip-ViT-B-32";

/// Default image encoder endpoint.
pub const ENCODER_URL: &str = "http://127.0.0.1:8090";

/// Timeout for a single encoder request (seconds).
pub const ENCODER_TIMEOUT_SECS: u64 = 30;

/// Timeout for the encoder initialization handshake (seconds).
pub const ENCODER_INIT_TIMEOUT_SECS: u64 = 120;

/// Weight of the full-frame view in the fused embedding.
pub const FUSION_GLOBAL_WEIGHT: f32 = 0.35;

/// Weight of the center-crop (pattern) view in the fused embedding.
pub const FUSION_PATTERN_WEIGHT: f32 = 0.65;

/// Fraction of width and height kept by the pattern crop.
pub const PATTERN_CROP_FRACTION: f32 = 0.60;

/// Norm drift tolerated before a stored vector is re-normalized.
pub const NORM_DRIFT_TOLERANCE: f32 = 1e-3;

// =============================================================================
// IMAGE NORMALIZATION
// =============================================================================

/// Longest edge (pixels) after normalization.
pub const NORMALIZE_MAX_EDGE: u32 = 1024;

/// JPEG quality used when re-encoding normalized images.
pub const NORMALIZE_JPEG_QUALITY: u8 = 90;

/// CLAHE clip limit (multiple of the uniform bin height).
pub const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// CLAHE tile grid size (tiles per axis).
pub const CLAHE_TILE_GRID: u32 = 8;

// =============================================================================
// PERCEPTUAL HASH
// =============================================================================

/// dHash grid size; the fingerprint has `HASH_SIZE * HASH_SIZE` bits.
pub const HASH_SIZE: u32 = 8;

/// Maximum Hamming distance for a legacy hash match (out of 64 bits).
pub const HASH_MAX_DISTANCE: u32 = 10;

// =============================================================================
// SAMPLE CURATION
// =============================================================================

/// Samples less similar than this to the primary embedding are rejected.
pub const SAMPLE_MIN_SIMILARITY: f32 = 0.60;

/// Samples more similar than this to an existing sample are duplicates.
pub const SAMPLE_DUPLICATE_SIMILARITY: f32 = 0.95;

// =============================================================================
// SEARCH
// =============================================================================

/// Default cosine similarity threshold for visual search.
pub const SEARCH_THRESHOLD: f32 = 0.70;

/// Default number of matches returned by visual search.
pub const SEARCH_LIMIT: usize = 10;

// =============================================================================
// JOBS
// =============================================================================

/// Maximum concurrent background indexing jobs.
pub const JOB_MAX_CONCURRENT: usize = 2;

/// Capacity of the in-process indexing queue.
pub const JOB_QUEUE_CAPACITY: usize = 256;

/// Per-job timeout (seconds).
pub const JOB_TIMEOUT_SECS: u64 = 120;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Concurrent items processed by a backfill run.
pub const BACKFILL_CONCURRENCY: usize = 4;

/// Timeout for fetching a photo over HTTP during backfill (seconds).
pub const PHOTO_FETCH_TIMEOUT_SECS: u64 = 10;

/// Catalog database pool size.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Seconds to wait for a free pooled connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

pub const ENV_ENCODER_URL: &str = "VITRINA_ENCODER_URL";
pub const ENV_ENCODER_MODEL: &str = "VITRINA_ENCODER_MODEL";
pub const ENV_ENCODER_TIMEOUT_SECS: &str = "VITRINA_ENCODER_TIMEOUT_SECS";
pub const ENV_EMBED_DIM: &str = "VITRINA_EMBED_DIM";
pub const ENV_NORMALIZE_MAX_EDGE: &str = "VITRINA_NORMALIZE_MAX_EDGE";
pub const ENV_NORMALIZE_CONTRAST: &str = "VITRINA_NORMALIZE_CONTRAST";
pub const ENV_NORMALIZE_JPEG_QUALITY: &str = "VITRINA_NORMALIZE_JPEG_QUALITY";
pub const ENV_SAMPLE_MIN_SIMILARITY: &str = "VITRINA_SAMPLE_MIN_SIMILARITY";
pub const ENV_SAMPLE_DUPLICATE_SIMILARITY: &str = "VITRINA_SAMPLE_DUPLICATE_SIMILARITY";
pub const ENV_SEARCH_THRESHOLD: &str = "VITRINA_SEARCH_THRESHOLD";
pub const ENV_SEARCH_LIMIT: &str = "VITRINA_SEARCH_LIMIT";
pub const ENV_HASH_MAX_DISTANCE: &str = "VITRINA_HASH_MAX_DISTANCE";
pub const ENV_LEGACY_FALLBACK: &str = "VITRINA_LEGACY_FALLBACK";
pub const ENV_JOB_MAX_CONCURRENT: &str = "VITRINA_JOB_MAX_CONCURRENT";
pub const ENV_JOB_QUEUE_CAPACITY: &str = "VITRINA_JOB_QUEUE_CAPACITY";
pub const ENV_JOB_TIMEOUT_SECS: &str = "VITRINA_JOB_TIMEOUT_SECS";
pub const ENV_JOB_WORKER_ENABLED: &str = "VITRINA_JOB_WORKER_ENABLED";
pub const ENV_BACKFILL_CONCURRENCY: &str = "VITRINA_BACKFILL_CONCURRENCY";
pub const ENV_DB_MAX_CONNECTIONS: &str = "VITRINA_DB_MAX_CONNECTIONS";
pub const ENV_DB_ACQUIRE_TIMEOUT_SECS: &str = "VITRINA_DB_ACQUIRE_TIMEOUT_SECS";

/// Read and parse an environment variable, falling back to `default` when
/// unset or unparseable.
pub fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a boolean flag ("false"/"0" disable, anything else enables).
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fusion_weights_sum_to_one() {
        assert!((FUSION_GLOBAL_WEIGHT + FUSION_PATTERN_WEIGHT - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_curation_gates_ordered() {
        assert!(SAMPLE_MIN_SIMILARITY < SAMPLE_DUPLICATE_SIMILARITY);
    }

    #[test]
    fn test_env_or_falls_back_when_unset() {
        let v: u32 = env_or("VITRINA_TEST_SURELY_UNSET_VAR", 7);
        assert_eq!(v, 7);
    }

    #[test]
    fn test_env_flag_default() {
        assert!(env_flag("VITRINA_TEST_SURELY_UNSET_FLAG", true));
        assert!(!env_flag("VITRINA_TEST_SURELY_UNSET_FLAG", false));
    }
}
