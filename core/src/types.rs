use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a work item in the catalog
pub type ItemId = i64;

/// Prefix shared by every worker lease key
pub const WORKER_KEY_PREFIX: &str = "worker:";

/// Key of the shared reservation set
pub const RESERVATION_SET_KEY: &str = "legislation_ids";

/// Lease lifetime used when a caller does not supply one
pub const DEFAULT_TTL_SECS: u64 = 180;

/// Identity of a worker lease: one per (address, worker id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerKey {
    pub address: String,
    pub worker_id: String,
}

impl WorkerKey {
    pub fn new(address: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            address: address.into().trim().to_string(),
            worker_id: worker_id.into().trim().to_string(),
        }
    }

    /// Key under which the lease hash lives in the lease store
    pub fn storage_key(&self) -> String {
        format!("{}{}:{}", WORKER_KEY_PREFIX, self.address, self.worker_id)
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.worker_id)
    }
}

/// What a heartbeat does with the lease's assigned id list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Keep whatever list the lease already carries
    Unchanged,
    /// Replace the lease's list and merge the ids into the reservation set
    Assign(Vec<ItemId>),
}

impl From<Option<Vec<ItemId>>> for Assignment {
    fn from(ids: Option<Vec<ItemId>>) -> Self {
        match ids {
            Some(ids) => Assignment::Assign(ids),
            None => Assignment::Unchanged,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub key: WorkerKey,
    pub processed: u64,
    pub ttl_secs: u64,
    pub assignment: Assignment,
}

/// A live lease as reported by `list_active`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseSummary {
    pub address: String,
    pub worker_id: String,
    pub first_connection_time: DateTime<Utc>,
    pub last_connection_time: DateTime<Utc>,
    /// Seconds between first and last heartbeat
    pub active_time_secs: i64,
    pub total_processed_data: u64,
    pub legislation_ids: Vec<ItemId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_workers: usize,
    pub total_processed_data: u64,
    /// Raw lease hashes, one per active worker
    pub workers: Vec<BTreeMap<String, String>>,
    /// Opaque store diagnostics (`INFO memory`)
    pub memory_usage: BTreeMap<String, String>,
}

/// Result of removing a worker lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemovalOutcome {
    /// The lease was deleted and `released` ids left the reservation set
    Deleted { released: usize },
    /// No lease existed, or a concurrent caller removed it first
    NotFound,
}

/// Fill statistics of the work catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogStats {
    pub total: i64,
    pub with_payload: i64,
    pub with_text: i64,
    pub loaded: i64,
}

impl BacklogStats {
    fn percent(&self, count: i64) -> f64 {
        if self.total > 0 {
            count as f64 * 100.0 / self.total as f64
        } else {
            0.0
        }
    }

    /// Share of items that have (or had, before unloading) a binary payload
    pub fn payload_percent(&self) -> f64 {
        self.percent(self.with_payload + self.loaded)
    }

    pub fn text_percent(&self) -> f64 {
        self.percent(self.with_text + self.loaded)
    }

    pub fn loaded_percent(&self) -> f64 {
        self.percent(self.loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_format() {
        let key = WorkerKey::new(" 10.0.0.1 ", "w7");
        assert_eq!(key.storage_key(), "worker:10.0.0.1:w7");
        assert_eq!(key.to_string(), "10.0.0.1:w7");
    }

    #[test]
    fn test_assignment_from_option() {
        assert_eq!(Assignment::from(None), Assignment::Unchanged);
        assert_eq!(
            Assignment::from(Some(vec![1, 2])),
            Assignment::Assign(vec![1, 2])
        );
    }

    #[test]
    fn test_backlog_percentages_with_empty_catalog() {
        let stats = BacklogStats::default();
        assert_eq!(stats.payload_percent(), 0.0);
        assert_eq!(stats.loaded_percent(), 0.0);

        let stats = BacklogStats {
            total: 200,
            with_payload: 50,
            with_text: 10,
            loaded: 50,
        };
        assert_eq!(stats.payload_percent(), 50.0);
        assert_eq!(stats.text_percent(), 30.0);
        assert_eq!(stats.loaded_percent(), 25.0);
    }

    #[test]
    fn test_removal_outcome_serializes_tagged() {
        let json = serde_json::to_value(RemovalOutcome::Deleted { released: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "deleted", "released": 2}));
        let json = serde_json::to_value(RemovalOutcome::NotFound).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "not_found"}));
    }
}
