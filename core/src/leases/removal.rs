//! Worker removal
//!
//! Releases the removed worker's still-outstanding ids from the reservation
//! set and deletes its lease in one optimistic transaction over both keys.
//! A conflict restarts the whole attempt, including the catalog check,
//! because the releasable ids may be stale after a concurrent write.

use tracing::{debug, info, warn};

use super::registry::{read_lease, FIELD_ASSIGNED};
use super::reservations::{self, decode_ids, encode_ids};
use crate::catalog::WorkCatalog;
use crate::error::{LeaseError, LeaseResult};
use crate::lease_store::{Commit, LeaseStore, WriteOp};
use crate::retry::RetryPolicy;
use crate::types::{RemovalOutcome, WorkerKey, RESERVATION_SET_KEY};

enum Attempt {
    Finished(RemovalOutcome),
    Conflict,
}

pub async fn remove_worker<S, C>(
    store: &S,
    catalog: &C,
    worker: &WorkerKey,
    retry: &RetryPolicy,
) -> LeaseResult<RemovalOutcome>
where
    S: LeaseStore,
    C: WorkCatalog,
{
    let lease_key = worker.storage_key();

    for attempt in 1..=retry.max_attempts {
        match try_remove(store, catalog, &lease_key).await? {
            Attempt::Finished(outcome) => {
                match outcome {
                    RemovalOutcome::Deleted { released } => {
                        info!(%worker, released, attempt, "Worker removed");
                    }
                    RemovalOutcome::NotFound => {
                        debug!(%worker, "Worker not found for removal");
                    }
                }
                return Ok(outcome);
            }
            Attempt::Conflict => {
                warn!(%worker, attempt, "Concurrent update while removing worker, retrying");
                if attempt < retry.max_attempts {
                    retry.pause(attempt).await;
                }
            }
        }
    }

    Err(LeaseError::ConflictExhausted {
        key: worker.to_string(),
        attempts: retry.max_attempts,
    })
}

async fn try_remove<S, C>(store: &S, catalog: &C, lease_key: &str) -> LeaseResult<Attempt>
where
    S: LeaseStore,
    C: WorkCatalog,
{
    if !store.exists(lease_key).await? {
        return Ok(Attempt::Finished(RemovalOutcome::NotFound));
    }

    let assigned = read_lease(store, lease_key)
        .await?
        .and_then(|mut fields| fields.remove(FIELD_ASSIGNED))
        .map(|raw| decode_ids(&raw, lease_key))
        .unwrap_or_default();

    let releasable = if assigned.is_empty() {
        Vec::new()
    } else {
        catalog.outstanding_among(&assigned).await?
    };

    let watch = store.watch(&[lease_key, RESERVATION_SET_KEY]).await?;

    // Another caller may have removed it since the first check
    if !store.exists(lease_key).await? {
        store.unwatch(watch).await?;
        return Ok(Attempt::Finished(RemovalOutcome::NotFound));
    }

    let mut ops = Vec::with_capacity(2);
    let mut released = 0;

    if !releasable.is_empty() {
        if let Some(before) = reservations::load(store).await? {
            let after = reservations::release(&before, &releasable);
            released = before.len() - after.len();
            ops.push(WriteOp::Set {
                key: RESERVATION_SET_KEY.to_string(),
                value: encode_ids(&after)?,
            });
        }
    }
    ops.push(WriteOp::Delete {
        key: lease_key.to_string(),
    });

    Ok(match store.commit(watch, ops).await? {
        Commit::Applied => Attempt::Finished(RemovalOutcome::Deleted { released }),
        Commit::Conflict => Attempt::Conflict,
    })
}
