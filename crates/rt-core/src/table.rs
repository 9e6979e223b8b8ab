//! Table topology
//!
//! The table's metadata record maps contiguous key ranges to shard objects.
//! Descriptors are kept ordered by lower bound, pairwise disjoint, and their
//! union is always the full `[0, u64::MAX]` domain. The record carries a
//! sequence number bumped on every topology change; writers use it for
//! optimistic concurrency, readers cache whole snapshots.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{TableError, TableResult};

/// Identifier of a shard's backing object.
pub type ShardId = String;

/// The topology's view of one shard: its id and assigned inclusive range.
///
/// This view may lag the shard's own header during a migration; the shard's
/// header is authoritative for what it currently accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub shard_id: ShardId,
    /// Inclusive lower bound.
    pub lower_bound: u64,
    /// Inclusive upper bound.
    pub upper_bound: u64,
}

impl ShardDescriptor {
    pub fn new(shard_id: ShardId, lower_bound: u64, upper_bound: u64) -> Self {
        Self {
            shard_id,
            lower_bound,
            upper_bound,
        }
    }

    /// Check if a key belongs to this descriptor's range.
    pub fn contains(&self, key: u64) -> bool {
        key >= self.lower_bound && key <= self.upper_bound
    }
}

/// The table's persisted metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Namespace for shard object names generated for this table.
    pub unique_id: String,
    /// Bumped on every topology change.
    pub sequence: u64,
    /// Descriptors ordered by `lower_bound`.
    pub shards: Vec<ShardDescriptor>,
}

impl TableMetadata {
    /// Create the initial topology: one shard spanning the full key domain,
    /// sequence 0.
    pub fn create(unique_id: String, first_shard_id: ShardId) -> Self {
        Self {
            unique_id,
            sequence: 0,
            shards: vec![ShardDescriptor::new(first_shard_id, 0, u64::MAX)],
        }
    }

    /// Find the descriptor owning `key`.
    ///
    /// Binary search over the ordered descriptor set; `NoOwningShard` means
    /// the full-coverage invariant is broken (corrupted topology).
    pub fn locate(&self, key: u64) -> TableResult<&ShardDescriptor> {
        let idx = self.shards.partition_point(|d| d.lower_bound <= key);
        if idx > 0 {
            let candidate = &self.shards[idx - 1];
            if candidate.contains(key) {
                return Ok(candidate);
            }
        }
        Err(TableError::NoOwningShard(key))
    }

    /// Look up a descriptor by shard id.
    pub fn descriptor(&self, shard_id: &str) -> Option<&ShardDescriptor> {
        self.shards.iter().find(|d| d.shard_id == shard_id)
    }

    /// Split one descriptor in two.
    ///
    /// The descriptor for `old_shard_id`, currently spanning `[lo, hi]` with
    /// `lo < split_point <= hi`, is replaced by `{new_shard_id, lo,
    /// split_point - 1}` and `{old_shard_id, split_point, hi}`; the old
    /// shard keeps the upper half. The sequence is bumped.
    ///
    /// Fails with `ConcurrentModification` when the caller's view is stale:
    /// the sequence moved, the shard is gone, or its range no longer spans
    /// the split point. The caller re-reads and retries the whole decision.
    pub fn apply_split(
        &mut self,
        expected_sequence: u64,
        old_shard_id: &str,
        split_point: u64,
        new_shard_id: ShardId,
    ) -> TableResult<()> {
        let stale = || TableError::ConcurrentModification {
            expected: expected_sequence,
            actual: self.sequence,
        };

        if self.sequence != expected_sequence {
            return Err(stale());
        }

        let idx = self
            .shards
            .iter()
            .position(|d| d.shard_id == old_shard_id)
            .ok_or_else(stale)?;

        let (lo, hi) = (self.shards[idx].lower_bound, self.shards[idx].upper_bound);
        if split_point <= lo || split_point > hi {
            return Err(stale());
        }

        self.shards[idx].lower_bound = split_point;
        self.shards
            .insert(idx, ShardDescriptor::new(new_shard_id, lo, split_point - 1));
        self.sequence += 1;
        Ok(())
    }

    /// Whether the descriptors are ordered, disjoint, and cover the full key
    /// domain exactly.
    pub fn covers_domain(&self) -> bool {
        let Some(first) = self.shards.first() else {
            return false;
        };
        if first.lower_bound != 0 {
            return false;
        }
        for pair in self.shards.windows(2) {
            if pair[0].upper_bound == u64::MAX
                || pair[1].lower_bound != pair[0].upper_bound + 1
            {
                return false;
            }
        }
        self.shards
            .last()
            .is_some_and(|d| d.upper_bound == u64::MAX)
    }

    /// Encode into the persisted metadata record.
    pub fn encode(&self) -> TableResult<Bytes> {
        codec::encode("table metadata", self)
    }

    /// Decode a persisted metadata record.
    pub fn decode(buf: &[u8]) -> TableResult<Self> {
        codec::decode("table metadata", buf)
    }
}
