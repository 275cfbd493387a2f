//! Work claiming

use tracing::info;

use super::{registry, reservations};
use crate::catalog::WorkCatalog;
use crate::error::{LeaseError, LeaseResult};
use crate::lease_store::LeaseStore;
use crate::types::{Assignment, Heartbeat, ItemId, WorkerKey};

/// Hand up to `limit` unreserved outstanding ids to a worker
///
/// The ids become the worker's assigned list and join the reservation set
/// through a heartbeat that reports no progress. An empty result still
/// refreshes the lease and clears its previous assignment.
pub async fn claim_work<S, C>(
    store: &S,
    catalog: &C,
    worker: WorkerKey,
    limit: u32,
    ttl_secs: u64,
) -> LeaseResult<Vec<ItemId>>
where
    S: LeaseStore,
    C: WorkCatalog,
{
    if limit == 0 {
        return Err(LeaseError::InvalidArgument(
            "claim limit must be at least 1".to_string(),
        ));
    }

    let reserved = reservations::current(store).await?;
    let ids = catalog.free_items(&reserved, limit).await?;

    info!(%worker, claimed = ids.len(), reserved = reserved.len(), "Claimed work");

    registry::heartbeat(
        store,
        Heartbeat {
            key: worker,
            processed: 0,
            ttl_secs,
            assignment: Assignment::Assign(ids.clone()),
        },
    )
    .await?;

    Ok(ids)
}
