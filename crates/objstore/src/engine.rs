//! Storage engine trait definitions
//!
//! The capability required from the external object-storage engine:
//! - atomic get/set of an opaque per-shard header blob
//! - atomic batch set of key-value entries scoped to one shard object
//! - paged range read and range delete over a shard's key space
//! - create/remove of a shard object
//! - atomic whole-object read/overwrite for the table's metadata record
//!
//! The engine serializes operations against one object; a `ShardWrite` either
//! applies in full or not at all. Cross-object atomicity is not provided and
//! not assumed anywhere.

use async_trait::async_trait;
use bytes::Bytes;

use rt_core::error::EngineResult;

/// One key-value entry in a shard object's ordered map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: u64,
    pub value: Bytes,
}

impl Entry {
    pub fn new(key: u64, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// A batch of mutations applied atomically to one shard object.
#[derive(Debug, Clone, Default)]
pub struct ShardWrite {
    /// Replace the object's header blob.
    pub header: Option<Bytes>,
    /// Fail with `VersionMismatch` unless the object is at this write
    /// version, enabling optimistic read-modify-write of the header.
    pub expect_version: Option<u64>,
    /// Entries written unconditionally (last write wins per key).
    pub set: Vec<Entry>,
    /// Entries written only where the key is not already present.
    pub set_if_absent: Vec<Entry>,
    /// Inclusive key range to remove.
    pub delete_range: Option<(u64, u64)>,
}

/// A shard object's header blob plus the object's current write version.
#[derive(Debug, Clone)]
pub struct HeaderBlob {
    /// Encoded header; empty when the header has never been written.
    pub data: Bytes,
    /// Write version used as a `ShardWrite::expect_version` precondition.
    pub version: u64,
}

/// A whole-object record (the table's metadata) plus its write version.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub data: Bytes,
    /// Write version used as a `write_record` precondition.
    pub version: u64,
}

/// Interface to the external object-storage engine.
#[async_trait]
pub trait ObjectEngine: Send + Sync {
    /// Create an empty object. Fails with `AlreadyExists`.
    async fn create(&self, oid: &str) -> EngineResult<()>;

    /// Remove an object and everything it holds.
    async fn remove(&self, oid: &str) -> EngineResult<()>;

    /// Read an object's header blob and current write version.
    async fn read_header(&self, oid: &str) -> EngineResult<HeaderBlob>;

    /// Apply a `ShardWrite` atomically: header, entries and range delete
    /// commit together or not at all.
    async fn write(&self, oid: &str, write: ShardWrite) -> EngineResult<()>;

    /// Entries with keys in `[lower, upper]`, ascending, at most `limit`.
    async fn read_range(
        &self,
        oid: &str,
        lower: u64,
        upper: u64,
        limit: usize,
    ) -> EngineResult<Vec<Entry>>;

    /// Read a whole-object record.
    async fn read_record(&self, oid: &str) -> EngineResult<ObjectRecord>;

    /// Overwrite a whole-object record. With `expected_version` set this is
    /// a compare-and-swap failing with `VersionMismatch`; with `None` it
    /// creates or unconditionally replaces the record. Returns the new write
    /// version.
    async fn write_record(
        &self,
        oid: &str,
        data: Bytes,
        expected_version: Option<u64>,
    ) -> EngineResult<u64>;
}
