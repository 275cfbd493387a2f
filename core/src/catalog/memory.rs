//! In-process catalog used by tests and local tooling

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::WorkCatalog;
use crate::error::LeaseResult;
use crate::types::{BacklogStats, ItemId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemState {
    pub has_payload: bool,
    pub has_text: bool,
    pub loaded: bool,
}

impl ItemState {
    /// Payload downloaded, text not extracted yet
    pub fn pending() -> Self {
        Self {
            has_payload: true,
            ..Self::default()
        }
    }

    pub fn outstanding(&self) -> bool {
        self.has_payload && !self.has_text
    }
}

#[derive(Clone, Default)]
pub struct MemoryCatalog {
    items: Arc<Mutex<BTreeMap<ItemId, ItemState>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog where every given id is outstanding
    pub fn with_pending(ids: impl IntoIterator<Item = ItemId>) -> Self {
        let catalog = Self::new();
        for id in ids {
            catalog.insert(id, ItemState::pending());
        }
        catalog
    }

    fn items(&self) -> MutexGuard<'_, BTreeMap<ItemId, ItemState>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, id: ItemId, state: ItemState) {
        self.items().insert(id, state);
    }

    /// Record extracted text for `id`, which ends its outstanding state
    pub fn complete(&self, id: ItemId) {
        self.items().entry(id).or_default().has_text = true;
    }
}

impl WorkCatalog for MemoryCatalog {
    async fn outstanding_among(&self, ids: &[ItemId]) -> LeaseResult<Vec<ItemId>> {
        let wanted: HashSet<ItemId> = ids.iter().copied().collect();
        Ok(self
            .items()
            .iter()
            .filter(|(id, state)| wanted.contains(*id) && state.outstanding())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn free_items(&self, reserved: &[ItemId], limit: u32) -> LeaseResult<Vec<ItemId>> {
        let reserved: HashSet<ItemId> = reserved.iter().copied().collect();
        Ok(self
            .items()
            .iter()
            .filter(|(id, state)| !reserved.contains(*id) && state.outstanding())
            .map(|(id, _)| *id)
            .take(limit as usize)
            .collect())
    }

    async fn backlog_stats(&self) -> LeaseResult<BacklogStats> {
        let items = self.items();
        let count = |pred: fn(&ItemState) -> bool| items.values().filter(|s| pred(s)).count() as i64;

        Ok(BacklogStats {
            total: items.len() as i64,
            with_payload: count(|s| s.has_payload),
            with_text: count(|s| s.has_text),
            loaded: count(|s| s.loaded),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outstanding_and_free_items() {
        let catalog = MemoryCatalog::with_pending([1, 2, 3, 4]);
        catalog.complete(2);
        catalog.insert(5, ItemState::default());

        assert_eq!(
            catalog.outstanding_among(&[1, 2, 5, 9]).await.unwrap(),
            vec![1]
        );
        assert_eq!(catalog.free_items(&[1], 10).await.unwrap(), vec![3, 4]);
        assert_eq!(catalog.free_items(&[], 2).await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_backlog_stats() {
        let catalog = MemoryCatalog::with_pending([1, 2]);
        catalog.complete(1);
        catalog.insert(
            3,
            ItemState {
                loaded: true,
                ..ItemState::default()
            },
        );

        let stats = catalog.backlog_stats().await.unwrap();
        assert_eq!(
            stats,
            BacklogStats {
                total: 3,
                with_payload: 2,
                with_text: 1,
                loaded: 1,
            }
        );
    }
}
