//! Client-side table handle for RangeTable
//!
//! A `TableClient` routes puts to the shard owning each key using a cached
//! topology snapshot, refreshed periodically by a background task and eagerly
//! whenever a shard rejects a key as out of range. The refresh-and-retry loop
//! is the only cross-component synchronization in the system: there is no
//! lock or consensus round on the write path.

mod client;

pub use client::{ClientConfig, TableClient};
