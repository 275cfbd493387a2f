//! In-process lease store
//!
//! Mirrors the Redis semantics the coordinator relies on: keys expire lazily
//! once their TTL elapses, and every mutation (including expiry) bumps a
//! per-key version that watched transactions compare at commit time. Each
//! operation yields to the scheduler first so concurrent callers interleave
//! the way they would against a networked store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use redis::{ErrorKind, RedisError};
use tokio::time::Instant;

use super::{Commit, HashBatch, LeaseStore, WriteOp};
use crate::error::LeaseResult;

#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    state: Arc<Mutex<State>>,
}

pub struct MemoryWatch {
    versions: Vec<(String, u64)>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    versions: HashMap<String, u64>,
    clock: u64,
    forced_conflicts: usize,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

fn wrong_type() -> RedisError {
    RedisError::from((
        ErrorKind::TypeError,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    ))
}

impl State {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            self.entries.remove(&key);
            self.touch(&key);
        }
    }
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the state after dropping expired keys
    fn lock(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.purge_expired();
        state
    }

    /// Make the next `n` commits report a conflict regardless of versions
    #[cfg(test)]
    pub(crate) fn force_conflicts(&self, n: usize) {
        self.lock().forced_conflicts = n;
    }

    #[cfg(test)]
    pub(crate) fn expires_in(&self, key: &str) -> Option<Duration> {
        let state = self.lock();
        let expires_at = state.entries.get(key)?.expires_at?;
        Some(expires_at.saturating_duration_since(Instant::now()))
    }
}

impl LeaseStore for MemoryLeaseStore {
    type Watch = MemoryWatch;

    async fn exists(&self, key: &str) -> LeaseResult<bool> {
        tokio::task::yield_now().await;
        Ok(self.lock().entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> LeaseResult<Option<String>> {
        tokio::task::yield_now().await;
        match self.lock().entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type().into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> LeaseResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
        state.touch(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> LeaseResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if state.entries.remove(key).is_some() {
            state.touch(key);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> LeaseResult<HashMap<String, String>> {
        tokio::task::yield_now().await;
        match self.lock().entries.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.clone()),
            Some(_) => Err(wrong_type().into()),
        }
    }

    async fn hash_apply(&self, key: &str, batch: HashBatch) -> LeaseResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();

        let mut fields = match state.entries.get(key) {
            None => HashMap::new(),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => fields.clone(),
            Some(_) => return Err(wrong_type().into()),
        };

        // Validate every increment before writing anything, as MULTI would fail the batch
        for (field, delta) in &batch.increments {
            let current = match fields.get(*field) {
                None => 0,
                Some(raw) => raw.parse::<i64>().map_err(|_| {
                    RedisError::from((ErrorKind::TypeError, "hash value is not an integer"))
                })?,
            };
            fields.insert(field.to_string(), (current + delta).to_string());
        }
        for (field, value) in batch.fields {
            fields.insert(field.to_string(), value);
        }

        state.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields),
                expires_at: Some(Instant::now() + Duration::from_secs(batch.ttl_secs)),
            },
        );
        state.touch(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> LeaseResult<Vec<String>> {
        tokio::task::yield_now().await;
        let mut keys: Vec<String> = self
            .lock()
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn memory_info(&self) -> LeaseResult<HashMap<String, String>> {
        tokio::task::yield_now().await;
        let state = self.lock();
        Ok(HashMap::from([
            ("backend".to_string(), "memory".to_string()),
            ("keys".to_string(), state.entries.len().to_string()),
        ]))
    }

    async fn watch(&self, keys: &[&str]) -> LeaseResult<MemoryWatch> {
        tokio::task::yield_now().await;
        let state = self.lock();
        let versions = keys
            .iter()
            .map(|key| (key.to_string(), state.version(key)))
            .collect();
        Ok(MemoryWatch { versions })
    }

    async fn unwatch(&self, _watch: MemoryWatch) -> LeaseResult<()> {
        Ok(())
    }

    async fn commit(&self, watch: MemoryWatch, ops: Vec<WriteOp>) -> LeaseResult<Commit> {
        tokio::task::yield_now().await;
        let mut state = self.lock();

        if state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            return Ok(Commit::Conflict);
        }

        let changed = watch
            .versions
            .iter()
            .any(|(key, version)| state.version(key) != *version);
        if changed {
            return Ok(Commit::Conflict);
        }

        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    state.entries.insert(
                        key.clone(),
                        Entry {
                            value: Value::Str(value),
                            expires_at: None,
                        },
                    );
                    state.touch(&key);
                }
                WriteOp::Delete { key } => {
                    if state.entries.remove(&key).is_some() {
                        state.touch(&key);
                    }
                }
            }
        }

        Ok(Commit::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LeaseError;
    use tokio_test::{assert_err, assert_ok};

    fn batch(ttl_secs: u64) -> HashBatch {
        HashBatch {
            increments: vec![("count", 2)],
            fields: vec![("name", "w7".to_string())],
            ttl_secs,
        }
    }

    #[tokio::test]
    async fn test_hash_apply_creates_and_increments() {
        let store = MemoryLeaseStore::new();
        store.hash_apply("h", batch(60)).await.unwrap();
        store.hash_apply("h", batch(60)).await.unwrap();

        let fields = store.hash_get_all("h").await.unwrap();
        assert_eq!(fields["count"], "4");
        assert_eq!(fields["name"], "w7");
    }

    #[tokio::test]
    async fn test_increment_of_non_integer_fails_whole_batch() {
        let store = MemoryLeaseStore::new();
        store
            .hash_apply(
                "h",
                HashBatch {
                    fields: vec![("count", "many".to_string())],
                    ttl_secs: 60,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = store.hash_apply("h", batch(60)).await;
        assert!(matches!(assert_err!(result), LeaseError::Store(_)));
        assert_eq!(store.hash_get_all("h").await.unwrap()["count"], "many");
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryLeaseStore::new();
        store.set("s", "value").await.unwrap();
        assert_err!(store.hash_get_all("s").await);
        store.hash_apply("h", batch(60)).await.unwrap();
        assert_err!(store.get("h").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hash_expires_after_ttl() {
        let store = MemoryLeaseStore::new();
        store.hash_apply("h", batch(1)).await.unwrap();
        assert!(store.exists("h").await.unwrap());

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(!store.exists("h").await.unwrap());
        assert!(store.keys_with_prefix("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_applies_when_untouched() {
        let store = MemoryLeaseStore::new();
        store.set("a", "1").await.unwrap();

        let watch = store.watch(&["a", "b"]).await.unwrap();
        let outcome = store
            .commit(
                watch,
                vec![
                    WriteOp::Set {
                        key: "b".to_string(),
                        value: "2".to_string(),
                    },
                    WriteOp::Delete {
                        key: "a".to_string(),
                    },
                ],
            )
            .await;

        assert_eq!(assert_ok!(outcome), Commit::Applied);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_commit_conflicts_when_watched_key_changes() {
        let store = MemoryLeaseStore::new();
        store.set("a", "1").await.unwrap();

        let watch = store.watch(&["a"]).await.unwrap();
        store.set("a", "changed").await.unwrap();

        let outcome = store
            .commit(
                watch,
                vec![WriteOp::Delete {
                    key: "a".to_string(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(outcome, Commit::Conflict);
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("changed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_of_watched_key_is_a_conflict() {
        let store = MemoryLeaseStore::new();
        store.hash_apply("h", batch(1)).await.unwrap();

        let watch = store.watch(&["h"]).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let outcome = store
            .commit(
                watch,
                vec![WriteOp::Delete {
                    key: "h".to_string(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(outcome, Commit::Conflict);
    }

    #[tokio::test]
    async fn test_keys_with_prefix_is_sorted() {
        let store = MemoryLeaseStore::new();
        store.hash_apply("worker:b", batch(60)).await.unwrap();
        store.hash_apply("worker:a", batch(60)).await.unwrap();
        store.set("legislation_ids", "[]").await.unwrap();

        let keys = store.keys_with_prefix("worker:").await.unwrap();
        assert_eq!(keys, vec!["worker:a".to_string(), "worker:b".to_string()]);
    }
}
