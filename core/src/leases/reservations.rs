//! Reservation set: ids currently leased by any worker
//!
//! Stored as one JSON array under `RESERVATION_SET_KEY`. Heartbeats merge
//! into it with a plain read-modify-write; only worker removal edits it
//! under WATCH (see `removal`).

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{LeaseError, LeaseResult};
use crate::lease_store::{is_wrong_type, LeaseStore};
use crate::types::{ItemId, RESERVATION_SET_KEY};

pub(crate) fn encode_ids(ids: &[ItemId]) -> LeaseResult<String> {
    serde_json::to_string(ids).map_err(|source| LeaseError::Encode {
        what: "id list",
        source,
    })
}

/// Decode a stored id list, treating garbage as empty
pub(crate) fn decode_ids(raw: &str, key: &str) -> Vec<ItemId> {
    match serde_json::from_str::<Vec<ItemId>>(raw) {
        Ok(ids) => ids,
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable id list");
            Vec::new()
        }
    }
}

/// `existing` followed by the ids of `new` it lacks, first occurrence wins
pub fn union_ordered(existing: &[ItemId], new: &[ItemId]) -> Vec<ItemId> {
    let mut seen = HashSet::with_capacity(existing.len() + new.len());
    existing
        .iter()
        .chain(new)
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

/// `current` without any id in `to_remove`, order preserved
pub fn release(current: &[ItemId], to_remove: &[ItemId]) -> Vec<ItemId> {
    let removed: HashSet<ItemId> = to_remove.iter().copied().collect();
    current
        .iter()
        .copied()
        .filter(|id| !removed.contains(id))
        .collect()
}

/// The stored set, `None` when the key is absent or holds another data type
pub(crate) async fn load<S: LeaseStore>(store: &S) -> LeaseResult<Option<Vec<ItemId>>> {
    match store.get(RESERVATION_SET_KEY).await {
        Ok(raw) => Ok(raw.map(|raw| decode_ids(&raw, RESERVATION_SET_KEY))),
        Err(e) if is_wrong_type(&e) => {
            warn!(
                key = RESERVATION_SET_KEY,
                error = %e,
                "Ignoring reservation set of the wrong type"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Current reservation set; empty when absent or undecodable
pub async fn current<S: LeaseStore>(store: &S) -> LeaseResult<Vec<ItemId>> {
    Ok(load(store).await?.unwrap_or_default())
}

/// Merge `new_ids` into the shared set and return the combined set
///
/// Not protected against concurrent merges: two heartbeats racing here can
/// lose one update. Lost ids are only a missed reservation; the catalog
/// still filters completed items on every claim.
pub async fn merge<S: LeaseStore>(store: &S, new_ids: &[ItemId]) -> LeaseResult<Vec<ItemId>> {
    let existing = load(store).await?;
    let combined = union_ordered(existing.as_deref().unwrap_or_default(), new_ids);

    if existing.as_deref() != Some(combined.as_slice()) {
        store.set(RESERVATION_SET_KEY, &encode_ids(&combined)?).await?;
        debug!(added = new_ids.len(), size = combined.len(), "Merged reservations");
    }

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease_store::{HashBatch, MemoryLeaseStore};

    #[test]
    fn test_union_keeps_first_occurrence_order() {
        assert_eq!(union_ordered(&[1, 2, 3], &[3, 4]), vec![1, 2, 3, 4]);
        assert_eq!(union_ordered(&[5, 1], &[1, 9, 5, 2]), vec![5, 1, 9, 2]);
        assert_eq!(union_ordered(&[], &[2, 2, 1]), vec![2, 1]);
        assert_eq!(union_ordered(&[7, 7], &[]), vec![7]);
    }

    #[test]
    fn test_release_preserves_order() {
        assert_eq!(release(&[1, 2, 3, 4], &[3]), vec![1, 2, 4]);
        assert_eq!(release(&[1, 2], &[9]), vec![1, 2]);
        assert!(release(&[1, 2], &[2, 1]).is_empty());
    }

    #[test]
    fn test_decode_ids_soft_fails() {
        assert_eq!(decode_ids("[1,2]", "k"), vec![1, 2]);
        assert!(decode_ids("not json", "k").is_empty());
        assert!(decode_ids("{\"a\":1}", "k").is_empty());
    }

    #[tokio::test]
    async fn test_merge_twice_yields_ordered_union() {
        let store = MemoryLeaseStore::new();
        merge(&store, &[1, 2, 3]).await.unwrap();
        let combined = merge(&store, &[2, 5, 1, 6]).await.unwrap();

        assert_eq!(combined, vec![1, 2, 3, 5, 6]);
        assert_eq!(current(&store).await.unwrap(), vec![1, 2, 3, 5, 6]);
    }

    #[tokio::test]
    async fn test_current_is_empty_when_absent_or_corrupt() {
        let store = MemoryLeaseStore::new();
        assert!(current(&store).await.unwrap().is_empty());

        store.set(RESERVATION_SET_KEY, "[1, 2,").await.unwrap();
        assert!(current(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_of_wrong_type_reads_as_absent() {
        let store = MemoryLeaseStore::new();
        store
            .hash_apply(
                RESERVATION_SET_KEY,
                HashBatch {
                    fields: vec![("oops", "1".to_string())],
                    ttl_secs: 60,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(load(&store).await.unwrap(), None);
        assert!(current(&store).await.unwrap().is_empty());

        // The next merge replaces it with a proper list
        assert_eq!(merge(&store, &[7, 3]).await.unwrap(), vec![7, 3]);
        assert_eq!(current(&store).await.unwrap(), vec![7, 3]);
    }

    #[tokio::test]
    async fn test_merge_over_corrupt_set_starts_fresh() {
        let store = MemoryLeaseStore::new();
        store.set(RESERVATION_SET_KEY, "garbage").await.unwrap();

        let combined = merge(&store, &[4, 4, 8]).await.unwrap();
        assert_eq!(combined, vec![4, 8]);
        assert_eq!(
            store.get(RESERVATION_SET_KEY).await.unwrap().as_deref(),
            Some("[4,8]")
        );
    }
}
