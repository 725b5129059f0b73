//! Structured logging field names for vitrina.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-vector iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "search", "db", "inference", "jobs", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "normalizer", "extractor", "engine", "curator", "worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "extract", "search", "propose_sample", "compute_primary"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Catalog item UUID being operated on.
pub const ITEM_ID: &str = "item_id";

/// Sample UUID being operated on.
pub const SAMPLE_ID: &str = "sample_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search.
pub const RESULT_COUNT: &str = "result_count";

/// Number of candidate items considered.
pub const CANDIDATE_COUNT: &str = "candidate_count";

/// Number of stored vectors scanned.
pub const VECTOR_COUNT: &str = "vector_count";

/// Cosine similarity value.
pub const SIMILARITY: &str = "similarity";

/// Hamming distance value.
pub const HASH_DISTANCE: &str = "hash_distance";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for encoding.
pub const MODEL: &str = "model";

/// Byte length of an image payload.
pub const IMAGE_BYTES: &str = "image_bytes";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
