//! Worker registry: one lease hash per (address, worker id)

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use super::reservations::{self, decode_ids, encode_ids};
use crate::error::{LeaseError, LeaseResult};
use crate::lease_store::{is_wrong_type, HashBatch, LeaseStore};
use crate::types::*;

pub(crate) const FIELD_ADDRESS: &str = "ip";
pub(crate) const FIELD_WORKER_ID: &str = "worker_id";
pub(crate) const FIELD_FIRST_SEEN: &str = "first_connection_time";
pub(crate) const FIELD_LAST_SEEN: &str = "last_connection_time";
pub(crate) const FIELD_PROCESSED: &str = "total_processed_data";
pub(crate) const FIELD_ASSIGNED: &str = "legislation_ids";

/// Create or refresh a worker lease
///
/// Assigned ids are merged into the reservation set before the lease is
/// written. The lease itself is updated as one atomic batch on its own key:
/// processed count incremented, last-seen refreshed, id list overwritten
/// when assigned, and TTL reset.
pub async fn heartbeat<S: LeaseStore>(store: &S, beat: Heartbeat) -> LeaseResult<()> {
    if beat.ttl_secs < 1 {
        return Err(LeaseError::InvalidArgument(
            "ttl must be at least 1 second".to_string(),
        ));
    }
    // EXPIRE takes a signed count; a wrapped value would drop the lease at once
    if i64::try_from(beat.ttl_secs).is_err() {
        return Err(LeaseError::InvalidArgument(format!(
            "ttl {} is too large",
            beat.ttl_secs
        )));
    }
    let processed = i64::try_from(beat.processed).map_err(|_| {
        LeaseError::InvalidArgument(format!("processed count {} is too large", beat.processed))
    })?;

    let assigned = match &beat.assignment {
        Assignment::Assign(ids) => {
            reservations::merge(store, ids).await?;
            Some(encode_ids(ids)?)
        }
        Assignment::Unchanged => None,
    };

    let key = beat.key.storage_key();
    let now = Utc::now().to_rfc3339();

    let mut fields = vec![(FIELD_LAST_SEEN, now.clone())];
    if !store.exists(&key).await? {
        fields.extend([
            (FIELD_ADDRESS, beat.key.address.clone()),
            (FIELD_WORKER_ID, beat.key.worker_id.clone()),
            (FIELD_FIRST_SEEN, now),
        ]);
    }
    if let Some(json) = assigned {
        fields.push((FIELD_ASSIGNED, json));
    }

    // HINCRBY on a fresh hash starts from zero, so creation and refresh share one shape
    let batch = HashBatch {
        increments: vec![(FIELD_PROCESSED, processed)],
        fields,
        ttl_secs: beat.ttl_secs,
    };
    store.hash_apply(&key, batch).await?;

    debug!(
        worker = %beat.key,
        processed = beat.processed,
        ttl_secs = beat.ttl_secs,
        "Heartbeat recorded"
    );
    Ok(())
}

/// Fields of a lease hash; `None` when the key vanished or is not a hash
pub(crate) async fn read_lease<S: LeaseStore>(
    store: &S,
    key: &str,
) -> LeaseResult<Option<HashMap<String, String>>> {
    match store.hash_get_all(key).await {
        Ok(fields) if fields.is_empty() => Ok(None),
        Ok(fields) => Ok(Some(fields)),
        Err(e) if is_wrong_type(&e) => {
            warn!(key, error = %e, "Ignoring worker key that is not a lease hash");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Parse a stored timestamp
///
/// RFC 3339 is what this crate writes; naive ISO-8601 (taken as UTC) is
/// accepted for leases written by older deployments.
pub(crate) fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| anyhow!("unparseable timestamp {:?}: {}", raw, e))
}

fn parse_processed(key: &str, fields: &HashMap<String, String>) -> u64 {
    match fields.get(FIELD_PROCESSED).map(|raw| raw.parse::<u64>()) {
        None => 0,
        Some(Ok(count)) => count,
        Some(Err(e)) => {
            warn!(key, error = %e, "Treating unparseable processed count as zero");
            0
        }
    }
}

/// Address and worker id recovered from `worker:<address>:<workerId>`
fn split_storage_key(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(WORKER_KEY_PREFIX)?.rsplit_once(':')
}

fn summarize(key: &str, fields: &HashMap<String, String>) -> anyhow::Result<LeaseSummary> {
    let last_seen = fields
        .get(FIELD_LAST_SEEN)
        .ok_or_else(|| anyhow!("missing {}", FIELD_LAST_SEEN))
        .and_then(|raw| parse_timestamp(raw))?;

    // A lease that expired between EXISTS and the refresh batch is recreated without it
    let first_seen = match fields.get(FIELD_FIRST_SEEN) {
        Some(raw) => parse_timestamp(raw)?,
        None => last_seen,
    };

    let (key_address, key_worker) = split_storage_key(key).unwrap_or((key, ""));
    let address = fields.get(FIELD_ADDRESS).map_or(key_address, String::as_str);
    let worker_id = fields.get(FIELD_WORKER_ID).map_or(key_worker, String::as_str);

    Ok(LeaseSummary {
        address: address.to_string(),
        worker_id: worker_id.to_string(),
        first_connection_time: first_seen,
        last_connection_time: last_seen,
        active_time_secs: (last_seen - first_seen).num_seconds(),
        total_processed_data: parse_processed(key, fields),
        legislation_ids: fields
            .get(FIELD_ASSIGNED)
            .map(|raw| decode_ids(raw, key))
            .unwrap_or_default(),
    })
}

/// Every lease that has not expired, ordered by key
pub async fn list_active<S: LeaseStore>(store: &S) -> LeaseResult<Vec<LeaseSummary>> {
    let keys = store.keys_with_prefix(WORKER_KEY_PREFIX).await?;
    let mut leases = Vec::with_capacity(keys.len());

    for key in keys {
        let Some(fields) = read_lease(store, &key).await? else {
            continue;
        };
        match summarize(&key, &fields) {
            Ok(summary) => leases.push(summary),
            Err(e) => warn!(key, error = %e, "Skipping malformed worker lease"),
        }
    }

    Ok(leases)
}

pub async fn aggregate_stats<S: LeaseStore>(store: &S) -> LeaseResult<WorkerStats> {
    let keys = store.keys_with_prefix(WORKER_KEY_PREFIX).await?;
    let mut workers = Vec::with_capacity(keys.len());
    let mut total_processed: u64 = 0;

    for key in keys {
        let Some(fields) = read_lease(store, &key).await? else {
            continue;
        };
        total_processed = total_processed.saturating_add(parse_processed(&key, &fields));
        workers.push(fields.into_iter().collect::<BTreeMap<_, _>>());
    }

    let memory_usage = store.memory_info().await?.into_iter().collect();

    Ok(WorkerStats {
        total_workers: workers.len(),
        total_processed_data: total_processed,
        workers,
        memory_usage,
    })
}
