//! Typed operations scoped to one shard object
//!
//! Every mutation is a read-modify-write of the shard's header committed
//! atomically with its entry batch through a single `ShardWrite`. Lost races
//! against concurrent writers to the same object surface as engine version
//! mismatches and are simply retried with a fresh read; the store itself
//! takes no locks.

use std::sync::Arc;

use tracing::{debug, info};

use rt_core::error::{EngineError, TableResult};
use rt_core::shard::ShardHeader;
use rt_core::table::ShardId;

use crate::engine::{Entry, ObjectEngine, ShardWrite};

/// Atomic header/entry operations against one shard object.
#[derive(Clone)]
pub struct ShardStore {
    engine: Arc<dyn ObjectEngine>,
    shard_id: ShardId,
}

impl ShardStore {
    pub fn new(engine: Arc<dyn ObjectEngine>, shard_id: impl Into<ShardId>) -> Self {
        Self {
            engine,
            shard_id: shard_id.into(),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Create the backing object and write its initial header.
    pub async fn create_with_header(&self, header: &ShardHeader) -> TableResult<()> {
        self.engine.create(&self.shard_id).await?;
        self.engine
            .write(
                &self.shard_id,
                ShardWrite {
                    header: Some(header.encode()?),
                    ..Default::default()
                },
            )
            .await?;
        debug!(
            shard = %self.shard_id,
            lower = header.lower_bound,
            upper = header.upper_bound,
            "created shard object"
        );
        Ok(())
    }

    /// Read and decode the shard's header, returning the engine write version
    /// used to guard a subsequent read-modify-write.
    pub async fn read_header(&self) -> TableResult<(ShardHeader, u64)> {
        let blob = self.engine.read_header(&self.shard_id).await?;
        Ok((ShardHeader::decode(&blob.data)?, blob.version))
    }

    /// Insert a batch of entries.
    ///
    /// Validates every key against the accepted range, updates the seen
    /// bounds and counters, evaluates the split policy, and commits the
    /// entries together with the updated header: all keys and the header
    /// apply, or nothing does. Returns the header as written.
    pub async fn put_entries(&self, entries: &[Entry]) -> TableResult<ShardHeader> {
        loop {
            let (mut header, version) = self.read_header().await?;
            for entry in entries {
                header.accept(entry.key)?;
            }
            if header.evaluate_split() {
                info!(
                    shard = %self.shard_id,
                    entries = header.effective_entries,
                    lower_seen = header.lower_bound_seen,
                    upper_seen = header.upper_bound_seen,
                    split_point = header.pending_split_point,
                    "shard crossed split threshold"
                );
            }

            let write = ShardWrite {
                header: Some(header.encode()?),
                expect_version: Some(version),
                set: entries.to_vec(),
                ..Default::default()
            };
            match self.engine.write(&self.shard_id, write).await {
                Ok(()) => return Ok(header),
                Err(EngineError::VersionMismatch { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write migrated entries, skipping keys already present so a copied old
    /// value never clobbers a newer write into this shard. Counters and seen
    /// bounds are left alone: copies are not inserts, and re-copied pages
    /// must stay free of side effects.
    pub async fn restore_entries(&self, entries: &[Entry]) -> TableResult<()> {
        self.engine
            .write(
                &self.shard_id,
                ShardWrite {
                    set_if_absent: entries.to_vec(),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Persist migration progress: everything below `next` has been copied
    /// into the destination shard.
    pub async fn advance_cursor(&self, next: u64) -> TableResult<()> {
        loop {
            let (mut header, version) = self.read_header().await?;
            header.confirm_migrated(next);
            match self.write_header(header, version).await {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Raise the accepted lower bound to the pending split point so puts into
    /// the migrated half start failing with `OutOfRange`. Idempotent; returns
    /// the header after the fence.
    pub async fn fence(&self) -> TableResult<ShardHeader> {
        loop {
            let (mut header, version) = self.read_header().await?;
            if !header.split_required || header.is_fenced() {
                return Ok(header);
            }
            header.fence_split();
            match self.write_header(header.clone(), version).await {
                Ok(true) => {
                    info!(
                        shard = %self.shard_id,
                        lower = header.lower_bound,
                        "fenced migrated half"
                    );
                    return Ok(header);
                }
                Ok(false) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Complete a split: delete the migrated range and clear the split
    /// request in one atomic write. Returns `false` when the split was
    /// already completed; a second finalize observes nothing left to do.
    pub async fn finish_split(&self) -> TableResult<bool> {
        loop {
            let (mut header, version) = self.read_header().await?;
            if !header.split_required {
                return Ok(false);
            }
            // Keys below the shard's original lower bound never existed, so
            // deleting from zero removes exactly the migrated range.
            let migrated_upper = header.pending_split_point - 1;
            header.clear_split();

            let write = ShardWrite {
                header: Some(header.encode()?),
                expect_version: Some(version),
                delete_range: Some((0, migrated_upper)),
                ..Default::default()
            };
            match self.engine.write(&self.shard_id, write).await {
                Ok(()) => {
                    info!(
                        shard = %self.shard_id,
                        migrated_upper,
                        "split finalized, migrated range deleted"
                    );
                    return Ok(true);
                }
                Err(EngineError::VersionMismatch { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Paged ascending read of `[lower, upper]`, used only by migration.
    pub async fn read_range(
        &self,
        lower: u64,
        upper: u64,
        limit: usize,
    ) -> TableResult<Vec<Entry>> {
        Ok(self
            .engine
            .read_range(&self.shard_id, lower, upper, limit)
            .await?)
    }

    /// Write `header` guarded by `version`. `Ok(false)` means the guard
    /// failed and the caller should re-read.
    async fn write_header(&self, header: ShardHeader, version: u64) -> TableResult<bool> {
        let write = ShardWrite {
            header: Some(header.encode()?),
            expect_version: Some(version),
            ..Default::default()
        };
        match self.engine.write(&self.shard_id, write).await {
            Ok(()) => Ok(true),
            Err(EngineError::VersionMismatch { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
