//! Core data models for vitrina.
//!
//! These types are shared across all vitrina crates and represent the
//! catalog entities the matching engine reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vector::EmbeddingVector;

// =============================================================================
// CATALOG TYPES
// =============================================================================

/// A catalog entry as seen by the matching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub name: String,
    pub category: String,
    pub collection: Option<String>,
    /// Representative photo reference (data URI or URL). Opaque to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    /// Legacy perceptual hash (hex dHash).
    pub image_hash: Option<String>,
    /// Stored primary embedding, raw little-endian `f32` bytes.
    #[serde(skip)]
    pub image_embedding: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Whether a primary embedding buffer is stored (it may still be corrupt).
    pub fn has_embedding(&self) -> bool {
        self.image_embedding.as_ref().is_some_and(|b| !b.is_empty())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Decode the stored primary embedding.
    ///
    /// `Ok(None)` when absent; `Err(CorruptVector)` when malformed.
    pub fn primary_embedding(&self, dimension: usize) -> crate::Result<Option<EmbeddingVector>> {
        match self.image_embedding.as_deref() {
            None | Some([]) => Ok(None),
            Some(bytes) => EmbeddingVector::from_le_bytes(bytes, dimension).map(Some),
        }
    }
}

/// An accepted reference embedding for an item beyond its primary one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: Uuid,
    pub item_id: Uuid,
    #[serde(skip)]
    pub embedding: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Request for creating a catalog item.
#[derive(Debug, Clone)]
pub struct CreateItemRequest {
    pub branch_id: Uuid,
    pub name: String,
    pub category: String,
    pub collection: Option<String>,
    pub photo: Option<String>,
}

/// Candidate selection for item listing.
///
/// Branch, category and soft-delete scoping are collaborator concerns; the
/// engine only ever receives the result.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub branch_id: Option<Uuid>,
    pub category: Option<String>,
    pub collection: Option<String>,
    /// Include soft-deleted items (default: false)
    pub include_deleted: bool,
    /// Only items with no stored primary embedding
    pub missing_embedding: bool,
    /// Only items with no legacy hash
    pub missing_hash: bool,
    /// Maximum results
    pub limit: Option<i64>,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, branch_id: Uuid) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn missing_embedding(mut self) -> Self {
        self.missing_embedding = true;
        self
    }

    pub fn missing_hash(mut self) -> Self {
        self.missing_hash = true;
        self
    }

    /// In-memory evaluation, mirroring the SQL predicate.
    pub fn matches(&self, item: &Item) -> bool {
        if !self.include_deleted && item.is_deleted() {
            return false;
        }
        if self.branch_id.is_some_and(|b| b != item.branch_id) {
            return false;
        }
        if self.category.as_ref().is_some_and(|c| c != &item.category) {
            return false;
        }
        if self
            .collection
            .as_ref()
            .is_some_and(|c| item.collection.as_ref() != Some(c))
        {
            return false;
        }
        if self.missing_embedding && item.has_embedding() {
            return false;
        }
        if self.missing_hash && item.image_hash.is_some() {
            return false;
        }
        true
    }
}

// =============================================================================
// MATCHING RESULT TYPES
// =============================================================================

/// Which stored view of an item produced its best similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "sample_id", rename_all = "snake_case")]
pub enum MatchedView {
    Primary,
    Sample(Uuid),
}

/// One embedding search result. Transient, produced fresh per query.
#[derive(Debug, Clone, Serialize)]
pub struct ImageMatch {
    pub item: Item,
    /// Best cosine similarity across the primary embedding and all samples.
    pub similarity: f32,
    pub view: MatchedView,
}

/// One legacy perceptual-hash result. Smaller distance = more similar.
#[derive(Debug, Clone, Serialize)]
pub struct HashMatch {
    pub item: Item,
    pub distance: u32,
}

// =============================================================================
// SAMPLE CURATION TYPES
// =============================================================================

/// Why a proposed sample was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// No embedding could be extracted from the photo.
    Unprocessable,
    /// The photo does not plausibly depict the item.
    LowSimilarity { similarity: f32 },
    /// The sample set already contains this view.
    Duplicate { similarity: f32 },
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessable => "unprocessable",
            Self::LowSimilarity { .. } => "low_similarity",
            Self::Duplicate { .. } => "duplicate",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of proposing a sample photo. Rejection is not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SampleOutcome {
    Accepted(Sample),
    Rejected(RejectReason),
}

impl SampleOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            Self::Accepted(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::encode_f32_le;

    fn item() -> Item {
        Item {
            id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            name: "Carpet 2x3".to_string(),
            category: "Gilamlar".to_string(),
            collection: Some("Isfahan".to_string()),
            photo: None,
            image_hash: None,
            image_embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_primary_embedding_absent() {
        assert!(item().primary_embedding(4).unwrap().is_none());
        let mut empty = item();
        empty.image_embedding = Some(Vec::new());
        assert!(!empty.has_embedding());
        assert!(empty.primary_embedding(4).unwrap().is_none());
    }

    #[test]
    fn test_primary_embedding_corrupt() {
        let mut it = item();
        it.image_embedding = Some(vec![1, 2, 3]);
        assert!(it.has_embedding());
        assert!(it.primary_embedding(4).is_err());
    }

    #[test]
    fn test_primary_embedding_decodes() {
        let mut it = item();
        it.image_embedding = Some(encode_f32_le(&[0.0, 1.0, 0.0, 0.0]));
        let v = it.primary_embedding(4).unwrap().unwrap();
        assert_eq!(v.as_slice(), &[0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_filter_excludes_deleted_by_default() {
        let mut it = item();
        it.deleted_at = Some(Utc::now());
        assert!(!ItemFilter::new().matches(&it));
        let filter = ItemFilter {
            include_deleted: true,
            ..Default::default()
        };
        assert!(filter.matches(&it));
    }

    #[test]
    fn test_filter_branch_category_collection() {
        let it = item();
        assert!(ItemFilter::new().with_branch(it.branch_id).matches(&it));
        assert!(!ItemFilter::new().with_branch(Uuid::new_v4()).matches(&it));
        assert!(ItemFilter::new().with_category("Gilamlar").matches(&it));
        assert!(!ItemFilter::new().with_category("Kovrik").matches(&it));
        assert!(ItemFilter::new().with_collection("Isfahan").matches(&it));
        assert!(!ItemFilter::new().with_collection("Tabriz").matches(&it));
    }

    #[test]
    fn test_filter_missing_selectors() {
        let mut it = item();
        assert!(ItemFilter::new().missing_embedding().matches(&it));
        it.image_embedding = Some(encode_f32_le(&[1.0]));
        assert!(!ItemFilter::new().missing_embedding().matches(&it));
        assert!(ItemFilter::new().missing_hash().matches(&it));
        it.image_hash = Some("00ff00ff00ff00ff".to_string());
        assert!(!ItemFilter::new().missing_hash().matches(&it));
    }

    #[test]
    fn test_reject_reason_wire_names() {
        assert_eq!(RejectReason::Unprocessable.as_str(), "unprocessable");
        assert_eq!(
            RejectReason::LowSimilarity { similarity: 0.5 }.to_string(),
            "low_similarity"
        );
        let json = serde_json::to_value(RejectReason::Duplicate { similarity: 0.97 }).unwrap();
        assert_eq!(json["reason"], "duplicate");
    }

    #[test]
    fn test_sample_outcome_accessors() {
        let rejected = SampleOutcome::Rejected(RejectReason::Unprocessable);
        assert!(!rejected.is_accepted());
        assert_eq!(rejected.reject_reason(), Some(RejectReason::Unprocessable));
    }

    #[test]
    fn test_matched_view_serialization() {
        let id = Uuid::nil();
        let json = serde_json::to_value(MatchedView::Sample(id)).unwrap();
        assert_eq!(json["kind"], "sample");
        assert_eq!(json["sample_id"], id.to_string());
        let json = serde_json::to_value(MatchedView::Primary).unwrap();
        assert_eq!(json["kind"], "primary");
    }
}
