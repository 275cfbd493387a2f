pub mod application;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod init;
pub mod lease_store;
pub mod leases;
pub mod logging;
pub mod retry;
pub mod services;
pub mod types;

// Re-export main types
pub use error::{LeaseError, LeaseResult};
pub use types::*;

// Re-export init API for convenience
pub use application::Application;
pub use init::{initialize, InitBuilder, InitOptions};
pub use services::LeaseService;
