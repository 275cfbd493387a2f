use crate::catalog::WorkCatalog;
use crate::config::LeasesConfig;
use crate::error::LeaseResult;
use crate::lease_store::LeaseStore;
use crate::leases;
use crate::retry::RetryPolicy;
use crate::types::*;

/// Service for worker lease operations (heartbeats, claims, removal)
#[derive(Clone)]
pub struct LeaseService<S, C> {
    store: S,
    catalog: C,
    default_ttl_secs: u64,
    removal_retry: RetryPolicy,
}

impl<S: LeaseStore, C: WorkCatalog> LeaseService<S, C> {
    pub fn new(store: S, catalog: C, settings: &LeasesConfig) -> Self {
        Self {
            store,
            catalog,
            default_ttl_secs: settings.default_ttl_secs,
            removal_retry: settings.removal_retry(),
        }
    }

    pub fn with_removal_retry(mut self, retry: RetryPolicy) -> Self {
        self.removal_retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Give up the service and hand back its backends
    pub fn into_parts(self) -> (S, C) {
        (self.store, self.catalog)
    }

    /// Record that a worker is alive
    ///
    /// `ttl_secs` falls back to the configured default. With
    /// `Assignment::Assign` the lease's id list is replaced and the ids are
    /// merged into the reservation set.
    pub async fn heartbeat(
        &self,
        worker: WorkerKey,
        processed: u64,
        ttl_secs: Option<u64>,
        assignment: Assignment,
    ) -> LeaseResult<()> {
        leases::heartbeat(
            &self.store,
            Heartbeat {
                key: worker,
                processed,
                ttl_secs: ttl_secs.unwrap_or(self.default_ttl_secs),
                assignment,
            },
        )
        .await
    }

    /// Reserve up to `limit` free items for a worker
    pub async fn claim_work(&self, worker: WorkerKey, limit: u32) -> LeaseResult<Vec<ItemId>> {
        leases::claim_work(
            &self.store,
            &self.catalog,
            worker,
            limit,
            self.default_ttl_secs,
        )
        .await
    }

    pub async fn list_active(&self) -> LeaseResult<Vec<LeaseSummary>> {
        leases::list_active(&self.store).await
    }

    pub async fn aggregate_stats(&self) -> LeaseResult<WorkerStats> {
        leases::aggregate_stats(&self.store).await
    }

    /// Ids currently reserved by any worker, in insertion order
    pub async fn reserved_ids(&self) -> LeaseResult<Vec<ItemId>> {
        leases::reserved_ids(&self.store).await
    }

    /// Remove a worker and release its ids that still need processing
    ///
    /// Returns `NotFound` when the lease is already gone. Fails with
    /// `ConflictExhausted` only after every retry collided with a
    /// concurrent writer.
    pub async fn remove_worker(&self, worker: &WorkerKey) -> LeaseResult<RemovalOutcome> {
        leases::remove_worker(&self.store, &self.catalog, worker, &self.removal_retry).await
    }

    pub async fn backlog_stats(&self) -> LeaseResult<BacklogStats> {
        self.catalog.backlog_stats().await
    }
}
