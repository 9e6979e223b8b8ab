//! Table metadata persistence
//!
//! The topology is persisted as one whole-object record (the table's head
//! object) and always replaced in full; topology changes are rare, so
//! simplicity wins over incremental patches. Concurrent coordinators race
//! through the engine's record version; a lost race surfaces as
//! `ConcurrentModification` and the caller re-reads and retries its whole
//! decision.

use std::sync::Arc;

use tracing::info;

use rt_core::error::{EngineError, TableError, TableResult};
use rt_core::table::{ShardId, TableMetadata};

use crate::engine::ObjectEngine;

/// Reads and optimistically rewrites the table's metadata record.
#[derive(Clone)]
pub struct TableStore {
    engine: Arc<dyn ObjectEngine>,
    head_oid: String,
}

impl TableStore {
    pub fn new(engine: Arc<dyn ObjectEngine>, head_oid: impl Into<String>) -> Self {
        Self {
            engine,
            head_oid: head_oid.into(),
        }
    }

    pub fn head_oid(&self) -> &str {
        &self.head_oid
    }

    /// Write the initial metadata record, replacing any previous table of the
    /// same name.
    pub async fn create(&self, metadata: &TableMetadata) -> TableResult<()> {
        self.engine
            .write_record(&self.head_oid, metadata.encode()?, None)
            .await?;
        info!(
            table = %self.head_oid,
            unique_id = %metadata.unique_id,
            "created table metadata"
        );
        Ok(())
    }

    /// Load and decode the current metadata record, returning the engine
    /// write version guarding a subsequent overwrite.
    pub async fn load(&self) -> TableResult<(TableMetadata, u64)> {
        let record = self.engine.read_record(&self.head_oid).await?;
        Ok((TableMetadata::decode(&record.data)?, record.version))
    }

    /// Split one descriptor and persist the whole record atomically.
    ///
    /// Fails with `ConcurrentModification` when the topology moved after the
    /// caller observed `expected_sequence`; either the in-memory validation
    /// or the engine's version guard catches it.
    pub async fn apply_split(
        &self,
        expected_sequence: u64,
        old_shard_id: &str,
        split_point: u64,
        new_shard_id: ShardId,
    ) -> TableResult<TableMetadata> {
        let (mut metadata, version) = self.load().await?;
        metadata.apply_split(expected_sequence, old_shard_id, split_point, new_shard_id)?;

        match self
            .engine
            .write_record(&self.head_oid, metadata.encode()?, Some(version))
            .await
        {
            Ok(_) => {
                info!(
                    table = %self.head_oid,
                    sequence = metadata.sequence,
                    source = old_shard_id,
                    split_point,
                    "applied split to topology"
                );
                Ok(metadata)
            }
            Err(EngineError::VersionMismatch { .. }) => {
                let (current, _) = self.load().await?;
                Err(TableError::ConcurrentModification {
                    expected: expected_sequence,
                    actual: current.sequence,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::memory::MemoryEngine;

    fn fresh() -> (Arc<MemoryEngine>, TableStore) {
        let engine = Arc::new(MemoryEngine::new());
        let store = TableStore::new(engine.clone(), "t1");
        (engine, store)
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let (_engine, store) = fresh();
        let metadata = TableMetadata::create("u1".to_string(), "u1.s0".to_string());
        store.create(&metadata).await.unwrap();

        let (loaded, _) = store.load().await.unwrap();
        assert_eq!(loaded, metadata);
    }

    #[tokio::test]
    async fn test_load_missing_table() {
        let (_engine, store) = fresh();
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, TableError::Engine(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_apply_split_persists_new_topology() {
        let (_engine, store) = fresh();
        store
            .create(&TableMetadata::create("u1".to_string(), "u1.s0".to_string()))
            .await
            .unwrap();

        let updated = store
            .apply_split(0, "u1.s0", 1000, "u1.s1".to_string())
            .await
            .unwrap();
        assert_eq!(updated.sequence, 1);

        let (loaded, _) = store.load().await.unwrap();
        assert_eq!(loaded, updated);
        assert!(loaded.covers_domain());
    }

    #[tokio::test]
    async fn test_apply_split_lost_race() {
        let (_engine, store) = fresh();
        store
            .create(&TableMetadata::create("u1".to_string(), "u1.s0".to_string()))
            .await
            .unwrap();

        // A competing coordinator commits first.
        store
            .apply_split(0, "u1.s0", 1000, "u1.s1".to_string())
            .await
            .unwrap();

        let err = store
            .apply_split(0, "u1.s0", 2000, "u1.s2".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TableError::ConcurrentModification { expected: 0, .. }
        ));
    }
}
