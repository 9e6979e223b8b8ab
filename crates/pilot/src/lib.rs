//! Pilot - the RangeTable split coordinator
//!
//! Watches a table's shards for headers that request a split and turns each
//! request into an actual topology change: allocate a new shard for the lower
//! half, apply the split to the table metadata with optimistic concurrency,
//! migrate the data in resumable pages, and finalize by fencing and deleting
//! the migrated range from the source shard.
//!
//! Coordinators are cooperative, not mutually exclusive: duplicate migration
//! work between instances is tolerated because destination writes are
//! idempotent per key, and finalize is guarded so it can only take effect
//! once.

pub mod config;
pub mod coordinator;
pub mod task;

// Re-export commonly used types
pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorHandle, SplitCoordinator};
pub use task::{SplitPhase, SplitTask};
