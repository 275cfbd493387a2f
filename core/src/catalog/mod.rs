//! Work catalog bridge
//!
//! Read-only view of the durable catalog of work items. An item is
//! outstanding while it has a binary payload but no extracted text.

use std::future::Future;

use crate::error::LeaseResult;
use crate::types::{BacklogStats, ItemId};

pub mod memory;
pub mod postgres;

pub use self::memory::{ItemState, MemoryCatalog};
pub use self::postgres::PgWorkCatalog;

pub trait WorkCatalog: Send + Sync {
    /// The subset of `ids` that still needs processing
    fn outstanding_among(
        &self,
        ids: &[ItemId],
    ) -> impl Future<Output = LeaseResult<Vec<ItemId>>> + Send;

    /// Up to `limit` outstanding ids not present in `reserved`
    fn free_items(
        &self,
        reserved: &[ItemId],
        limit: u32,
    ) -> impl Future<Output = LeaseResult<Vec<ItemId>>> + Send;

    fn backlog_stats(&self) -> impl Future<Output = LeaseResult<BacklogStats>> + Send;
}
