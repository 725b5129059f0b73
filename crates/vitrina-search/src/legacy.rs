//! Legacy perceptual-hash ranking.
//!
//! Hamming distances are not similarities; results from this path are kept
//! apart from cosine-ranked matches.

use tracing::debug;

use vitrina_core::{HashMatch, Item};
use vitrina_inference::hamming_distance;

/// Rank items by Hamming distance between their stored hash and `query_hash`.
///
/// Ascending (ties keep candidate order), distances above `max_distance`
/// dropped, truncated to `limit`. Items with no or malformed hashes are
/// skipped.
pub fn rank_by_hash(
    query_hash: &str,
    candidates: &[Item],
    max_distance: u32,
    limit: usize,
) -> Vec<HashMatch> {
    let mut matches: Vec<HashMatch> = candidates
        .iter()
        .filter_map(|item| {
            let stored = item.image_hash.as_deref()?;
            match hamming_distance(query_hash, stored) {
                Some(distance) => Some((item, distance)),
                None => {
                    debug!(
                        subsystem = "search",
                        component = "legacy",
                        item_id = %item.id,
                        "Skipping item with malformed hash"
                    );
                    None
                }
            }
        })
        .filter(|(_, distance)| *distance <= max_distance)
        .map(|(item, distance)| HashMatch {
            item: item.clone(),
            distance,
        })
        .collect();

    matches.sort_by_key(|m| m.distance);
    matches.truncate(limit);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item(hash: Option<&str>) -> Item {
        Item {
            id: Uuid::new_v4(),
            branch_id: Uuid::nil(),
            name: "x".to_string(),
            category: "rugs".to_string(),
            collection: None,
            photo: None,
            image_hash: hash.map(str::to_string),
            image_embedding: None,
            created_at: Default::default(),
            updated_at: Default::default(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_ranks_ascending_and_drops_far_hashes() {
        let exact = item(Some("ffffffffffffffff"));
        let near = item(Some("fffffffffffffff0")); // 4 bits off
        let far = item(Some("0000000000000000"));
        let results = rank_by_hash(
            "ffffffffffffffff",
            &[near.clone(), far, exact.clone()],
            10,
            10,
        );
        let ids: Vec<Uuid> = results.iter().map(|m| m.item.id).collect();
        assert_eq!(ids, vec![exact.id, near.id]);
        assert_eq!(results[1].distance, 4);
    }

    #[test]
    fn test_boundary_distance_is_kept() {
        let eight_off = item(Some("ffffffffffffff00"));
        let results = rank_by_hash("ffffffffffffffff", &[eight_off], 8, 10);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_skips_missing_and_malformed_hashes() {
        let results = rank_by_hash(
            "ffffffffffffffff",
            &[item(None), item(Some("not-hex")), item(Some("ff"))],
            64,
            10,
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_ties_keep_order_and_limit() {
        let a = item(Some("0000000000000001"));
        let b = item(Some("0000000000000002"));
        let results = rank_by_hash("0000000000000000", &[a.clone(), b], 10, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id, a.id);
    }
}
