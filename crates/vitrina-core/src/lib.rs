//! # vitrina-core
//!
//! Core types, traits, and abstractions for the vitrina visual product
//! matching engine.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other vitrina crates depend on: the catalog item and sample
//! models, the [`EmbeddingVector`] type with its persisted byte codec, the
//! error taxonomy, and the repository and encoder seams.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod vector;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use vector::{
    cosine_similarity, decode_f32_le, dot, encode_f32_le, l2_norm, normalize_in_place,
    EmbeddingVector,
};
