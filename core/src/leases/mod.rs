// Lease coordination module
//
// This module handles everything that touches worker leases:
// - Recording heartbeats and listing live workers
// - Maintaining the shared reservation set
// - Claiming work for a worker
// - Removing a worker and releasing its outstanding ids

mod claim;
mod registry;
mod removal;
pub mod reservations;


// Re-export public API
pub use claim::claim_work;
pub use registry::{aggregate_stats, heartbeat, list_active};
pub use removal::remove_worker;
pub use reservations::{current as reserved_ids, merge as merge_reservations};
