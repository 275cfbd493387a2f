//! Application container
//!
//! Holds the wired-up services for one process. Construction does no I/O;
//! `init::initialize` opens the connections and hands them in.

use sqlx::PgPool;
use tracing::info;

use crate::catalog::PgWorkCatalog;
use crate::config::Config;
use crate::lease_store::RedisLeaseStore;
use crate::services::LeaseService;

pub type ProductionLeaseService = LeaseService<RedisLeaseStore, PgWorkCatalog>;

/// The Sluice application instance with all services
pub struct Application {
    pub config: Config,
    pub pool: PgPool,
    pub lease_service: ProductionLeaseService,
}

impl Application {
    /// Create a new Application instance (pure instantiation, no I/O)
    pub fn new(config: Config, pool: PgPool, store: RedisLeaseStore) -> Self {
        let catalog = PgWorkCatalog::new(pool.clone(), &config.catalog);
        let lease_service = LeaseService::new(store, catalog, &config.leases);
        Self {
            config,
            pool,
            lease_service,
        }
    }

    /// Get the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Close the lease store and database connections
    pub async fn shutdown(self) {
        info!("Shutting down");
        let (store, _catalog) = self.lease_service.into_parts();
        store.close();
        self.pool.close().await;
        info!("Database pool closed");
    }
}
