//! Initialization for Sluice
//!
//! Loads configuration, opens the catalog pool and the lease store, and
//! returns an [`Application`].
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run() -> anyhow::Result<()> {
//! use sluice_core::init::InitBuilder;
//!
//! let app = InitBuilder::new()
//!     .database_url("postgresql://localhost/sluice")
//!     .lease_store_url("redis://127.0.0.1:6379")
//!     .init()
//!     .await?;
//! let workers = app.lease_service.list_active().await?;
//! # let _ = workers;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::application::Application;
use crate::config::{redact_url, Config};
use crate::lease_store::RedisLeaseStore;

/// Options for initializing Sluice
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Database URL (overrides config file and env vars)
    pub database_url: Option<String>,

    /// Lease store URL (overrides config file and env vars)
    pub lease_store_url: Option<String>,

    /// Config file path (overrides default search)
    pub config_path: Option<String>,
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    /// Create a new builder with default options
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    /// Set the database URL
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.options.database_url = Some(url.into());
        self
    }

    /// Set the lease store URL
    pub fn lease_store_url(mut self, url: impl Into<String>) -> Self {
        self.options.lease_store_url = Some(url.into());
        self
    }

    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Initialize Sluice with the configured options
    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve configuration for the given options
pub fn load_config(options: &InitOptions) -> Result<Config> {
    Config::builder()
        .database_url(options.database_url.clone())
        .lease_store_url(options.lease_store_url.clone())
        .config_path(options.config_path.clone().map(PathBuf::from))
        .build()
        .context("Failed to load configuration")
}

/// Initialize Sluice and return an Application instance
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = load_config(&options)?;

    // validate() guarantees the url is present
    let database_url = config.database.url.clone().unwrap_or_default();

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.database.max_lifetime_secs))
        .connect(&database_url)
        .await
        .with_context(|| format!("Failed to connect to {}", redact_url(&database_url)))?;

    let store = RedisLeaseStore::connect(&config.lease_store.url)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to lease store {}",
                redact_url(&config.lease_store.url)
            )
        })?;

    info!(
        database = %redact_url(&database_url),
        lease_store = %redact_url(&config.lease_store.url),
        "Initialized"
    );

    Ok(Application::new(config, pool, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_overrides() {
        let builder = InitBuilder::new()
            .database_url("postgresql://localhost/sluice")
            .lease_store_url("redis://cache:6379")
            .config_path("/etc/sluice.toml");

        assert_eq!(
            builder.options.database_url.as_deref(),
            Some("postgresql://localhost/sluice")
        );
        assert_eq!(
            builder.options.lease_store_url.as_deref(),
            Some("redis://cache:6379")
        );
        assert_eq!(builder.options.config_path.as_deref(), Some("/etc/sluice.toml"));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore]
    async fn test_init_with_local_services() {
        let result = InitBuilder::new()
            .database_url("postgresql://sluice@localhost/sluice")
            .lease_store_url("redis://127.0.0.1:6379")
            .init()
            .await;

        assert!(result.is_ok());
        if let Ok(app) = result {
            app.shutdown().await;
        }
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let options = InitOptions {
            database_url: Some("postgresql://sluice@localhost/sluice".to_string()),
            config_path: Some("/nonexistent/sluice.toml".to_string()),
            ..Default::default()
        };

        assert!(load_config(&options).is_err());
    }
}
