//! Lease Store
//!
//! Key-value primitives the coordinator needs from its shared store:
//! atomic per-key hash batches with expiry, plain string keys, prefix
//! enumeration, and optimistic WATCH/MULTI/EXEC transactions.
//!
//! `RedisLeaseStore` is the production backend. `MemoryLeaseStore` keeps the
//! same semantics (TTL expiry, watch conflicts) in process.

use std::collections::HashMap;
use std::future::Future;

use crate::error::{LeaseError, LeaseResult};

pub mod memory;
pub mod redis_store;

pub use self::memory::MemoryLeaseStore;
pub use self::redis_store::RedisLeaseStore;

/// Mutations applied to one hash key as a single atomic batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashBatch {
    pub increments: Vec<(&'static str, i64)>,
    pub fields: Vec<(&'static str, String)>,
    /// Expiry (re)set after the field writes
    pub ttl_secs: u64,
}

/// A write staged inside an optimistic transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: String },
    Delete { key: String },
}

/// Result of committing a watched transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// A watched key changed between watch and commit; nothing was written
    Conflict,
}

pub trait LeaseStore: Send + Sync {
    /// Handle for keys under observation; consumed by `commit` or `unwatch`
    type Watch: Send;

    fn exists(&self, key: &str) -> impl Future<Output = LeaseResult<bool>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = LeaseResult<Option<String>>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = LeaseResult<()>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = LeaseResult<()>> + Send;

    /// All fields of a hash; empty when the key is absent
    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = LeaseResult<HashMap<String, String>>> + Send;

    fn hash_apply(&self, key: &str, batch: HashBatch)
        -> impl Future<Output = LeaseResult<()>> + Send;

    fn keys_with_prefix(&self, prefix: &str)
        -> impl Future<Output = LeaseResult<Vec<String>>> + Send;

    /// Store-level diagnostics as key/value pairs
    fn memory_info(&self) -> impl Future<Output = LeaseResult<HashMap<String, String>>> + Send;

    /// Start observing `keys`; any later change to one of them makes `commit` report a conflict
    fn watch(&self, keys: &[&str]) -> impl Future<Output = LeaseResult<Self::Watch>> + Send;

    fn unwatch(&self, watch: Self::Watch) -> impl Future<Output = LeaseResult<()>> + Send;

    /// Apply `ops` atomically unless a watched key changed
    fn commit(
        &self,
        watch: Self::Watch,
        ops: Vec<WriteOp>,
    ) -> impl Future<Output = LeaseResult<Commit>> + Send;
}

/// Whether the store rejected a command because the key holds another data type
pub(crate) fn is_wrong_type(err: &LeaseError) -> bool {
    match err {
        LeaseError::Store(e) => {
            e.kind() == ::redis::ErrorKind::TypeError || e.code() == Some("WRONGTYPE")
        }
        _ => false,
    }
}

/// Parse the `key:value` lines of a Redis `INFO` section
pub(crate) fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
