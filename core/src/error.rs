//! Error kinds for lease operations
//!
//! Malformed stored data is not represented here: it is logged and treated as
//! empty where it is read. Logical absence is `RemovalOutcome::NotFound`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    /// The lease store could not be reached or rejected a command
    #[error("lease store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The work catalog query failed
    #[error("catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Worker removal kept colliding with concurrent writers
    #[error("gave up removing worker {key} after {attempts} conflicting attempts")]
    ConflictExhausted { key: String, attempts: u32 },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type LeaseResult<T> = std::result::Result<T, LeaseError>;
