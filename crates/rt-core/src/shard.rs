//! Per-shard header state and the split trigger policy
//!
//! The header is the only metadata a shard carries: the range it accepts, the
//! tightest range of keys it has actually seen, insert counters, and the
//! split/migration bookkeeping the coordinator drives. It is persisted as the
//! shard object's header blob and always read-modified-written as a whole.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{TableError, TableResult};

/// Number of effective entries a shard may hold before a split is requested.
pub const SPLIT_THRESHOLD: u64 = 1000;

/// Persisted per-shard state.
///
/// Counting is deliberately imprecise: re-inserting an existing key still
/// increments the counters, so `total_entries` and `effective_entries` are
/// upper bounds on distinct keys, not exact cardinalities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHeader {
    /// Inclusive lower bound of the range this shard accepts.
    pub lower_bound: u64,
    /// Inclusive upper bound of the range this shard accepts.
    pub upper_bound: u64,
    /// Smallest key actually inserted; valid once `total_entries > 0`.
    pub lower_bound_seen: u64,
    /// Largest key actually inserted; valid once `total_entries > 0`.
    pub upper_bound_seen: u64,
    /// Insert operations accepted over the shard's lifetime.
    pub total_entries: u64,
    /// Entries counted toward the split threshold. Reset when a completed
    /// split hands the migrated range off, re-arming the threshold.
    pub effective_entries: u64,
    /// Set once `effective_entries` crosses [`SPLIT_THRESHOLD`].
    pub split_required: bool,
    /// Chosen split key; meaningful only while `split_required` is set.
    pub pending_split_point: u64,
    /// Next unmigrated key while a split migration is underway, so a crashed
    /// coordinator resumes instead of restarting.
    pub migration_cursor: Option<u64>,
}

impl Default for ShardHeader {
    /// Zero-value header spanning the full key domain. Only a shard created
    /// at table-creation time decodes from an absent header; afterwards every
    /// shard carries an explicit bounded header.
    fn default() -> Self {
        Self::new(0, u64::MAX)
    }
}

impl ShardHeader {
    /// Create a header accepting the inclusive range `[lower, upper]`.
    pub fn new(lower: u64, upper: u64) -> Self {
        debug_assert!(lower <= upper);
        Self {
            lower_bound: lower,
            upper_bound: upper,
            lower_bound_seen: 0,
            upper_bound_seen: 0,
            total_entries: 0,
            effective_entries: 0,
            split_required: false,
            pending_split_point: 0,
            migration_cursor: None,
        }
    }

    /// Check if a key falls inside the accepted range.
    pub fn contains(&self, key: u64) -> bool {
        key >= self.lower_bound && key <= self.upper_bound
    }

    /// Record one accepted insert.
    ///
    /// Fails with `OutOfRange` when the key is outside the accepted range;
    /// otherwise widens the seen bounds and increments both counters.
    pub fn accept(&mut self, key: u64) -> TableResult<()> {
        if !self.contains(key) {
            return Err(TableError::OutOfRange {
                key,
                lower: self.lower_bound,
                upper: self.upper_bound,
            });
        }

        if self.total_entries == 0 {
            self.lower_bound_seen = key;
            self.upper_bound_seen = key;
        } else {
            if key < self.lower_bound_seen {
                self.lower_bound_seen = key;
            }
            if key > self.upper_bound_seen {
                self.upper_bound_seen = key;
            }
        }

        self.total_entries += 1;
        self.effective_entries += 1;
        Ok(())
    }

    /// Evaluate the split policy after a batch of accepted inserts.
    ///
    /// Once `effective_entries` crosses the threshold, the split point is the
    /// midpoint of the *seen* bounds (not the assigned range), which adapts
    /// to skewed key distributions. Returns whether a split was newly
    /// requested. A midpoint that does not exceed the lower bound (all mass
    /// on a single hot key) cannot produce two non-empty ranges, so no split
    /// is requested for it.
    pub fn evaluate_split(&mut self) -> bool {
        if self.split_required || self.effective_entries <= SPLIT_THRESHOLD {
            return false;
        }

        let split_point =
            self.lower_bound_seen + (self.upper_bound_seen - self.lower_bound_seen) / 2;
        if split_point <= self.lower_bound {
            return false;
        }

        self.split_required = true;
        self.pending_split_point = split_point;
        true
    }

    /// Persist migration progress: everything below `next` has been copied.
    pub fn confirm_migrated(&mut self, next: u64) {
        self.migration_cursor = Some(next);
    }

    /// Whether the accepted range has already been raised to the pending
    /// split point (the migrated half is fenced off).
    pub fn is_fenced(&self) -> bool {
        self.split_required && self.lower_bound == self.pending_split_point
    }

    /// Stop accepting the migrated half: raise the lower bound to the pending
    /// split point. Stale-cache puts below it now fail with `OutOfRange`.
    pub fn fence_split(&mut self) {
        debug_assert!(self.split_required);
        self.lower_bound = self.pending_split_point;
    }

    /// Finish a split: clear the request and migration bookkeeping, clamp the
    /// seen bounds to the truncated range, and re-arm the split threshold.
    pub fn clear_split(&mut self) {
        if self.lower_bound_seen < self.lower_bound {
            self.lower_bound_seen = self.lower_bound;
        }
        self.effective_entries = 0;
        self.split_required = false;
        self.pending_split_point = 0;
        self.migration_cursor = None;
    }

    /// Encode into the persisted header blob.
    pub fn encode(&self) -> TableResult<Bytes> {
        codec::encode("shard header", self)
    }

    /// Decode a persisted header blob. An empty blob decodes to the
    /// zero-value full-domain header.
    pub fn decode(buf: &[u8]) -> TableResult<Self> {
        if buf.is_empty() {
            return Ok(Self::default());
        }
        codec::decode("shard header", buf)
    }
}
