//! Object-storage engine boundary for RangeTable
//!
//! The durable engine is an external collaborator: it stores one object per
//! shard (an opaque header blob plus an ordered key-value map) and one
//! whole-record object per table, and guarantees atomicity of a single
//! object's write. This crate defines that contract (`ObjectEngine`), an
//! in-memory engine for tests and embedding, and the typed stores the rest of
//! the system uses (`ShardStore`, `TableStore`).

pub mod engine;
pub mod memory;
pub mod shard_store;
pub mod table_store;

// Re-export commonly used types
pub use engine::{Entry, HeaderBlob, ObjectEngine, ObjectRecord, ShardWrite};
pub use memory::MemoryEngine;
pub use shard_store::ShardStore;
pub use table_store::TableStore;
