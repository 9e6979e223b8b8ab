//! Table client: routing, refresh and retry

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use objstore::{Entry, ObjectEngine, ShardStore, TableStore};
use rt_core::error::{TableError, TableResult};
use rt_core::shard::ShardHeader;
use rt_core::table::TableMetadata;

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Background topology refresh interval (seconds).
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Maximum put attempts before giving up with `RoutingFailed`.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Base backoff between stale-route retries (milliseconds); grows
    /// linearly with the attempt number.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_retry_budget() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ClientConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Handle to one table.
///
/// Holds a cached topology snapshot and a background refresher. Constructed
/// explicitly with its storage engine; never mutates shard headers beyond the
/// put path.
pub struct TableClient {
    engine: Arc<dyn ObjectEngine>,
    store: TableStore,
    metadata: Arc<RwLock<TableMetadata>>,
    config: ClientConfig,
    refresher: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for TableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TableClient {
    /// Create a new table named `name`, replacing any previous table of the
    /// same name: a fresh metadata record with a single full-domain shard,
    /// plus that shard's backing object.
    pub async fn create(
        engine: Arc<dyn ObjectEngine>,
        name: &str,
        config: ClientConfig,
    ) -> TableResult<Self> {
        let unique_id = Uuid::new_v4().to_string();
        let first_shard_id = format!("{}.{}", unique_id, Uuid::new_v4());
        let metadata = TableMetadata::create(unique_id, first_shard_id.clone());

        let store = TableStore::new(engine.clone(), name);
        store.create(&metadata).await?;

        ShardStore::new(engine.clone(), first_shard_id)
            .create_with_header(&ShardHeader::default())
            .await?;

        info!(table = name, "created table");
        Ok(Self::start(engine, store, metadata, config))
    }

    /// Open an existing table named `name`.
    pub async fn open(
        engine: Arc<dyn ObjectEngine>,
        name: &str,
        config: ClientConfig,
    ) -> TableResult<Self> {
        let store = TableStore::new(engine.clone(), name);
        let (metadata, _) = store.load().await?;
        debug!(table = name, sequence = metadata.sequence, "opened table");
        Ok(Self::start(engine, store, metadata, config))
    }

    fn start(
        engine: Arc<dyn ObjectEngine>,
        store: TableStore,
        metadata: TableMetadata,
        config: ClientConfig,
    ) -> Self {
        let metadata = Arc::new(RwLock::new(metadata));
        let (shutdown, rx) = watch::channel(false);
        let refresher = tokio::spawn(refresh_loop(
            store.clone(),
            metadata.clone(),
            config.refresh_interval(),
            rx,
        ));

        Self {
            engine,
            store,
            metadata,
            config,
            refresher: Some(refresher),
            shutdown,
        }
    }

    /// Insert one key-value entry.
    ///
    /// Routes against the cached topology; when the addressed shard reports
    /// the key out of range (the cache went stale), refreshes from the source
    /// of truth and retries with backoff, up to the configured budget.
    pub async fn put(&self, key: u64, value: Bytes) -> TableResult<()> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let shard_id = self.metadata.read().locate(key)?.shard_id.clone();
            let shard = ShardStore::new(self.engine.clone(), shard_id);

            match shard.put_entries(&[Entry::new(key, value.clone())]).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_stale_route() => {
                    debug!(
                        key,
                        attempts,
                        shard = shard.shard_id(),
                        "stale route, refreshing topology"
                    );
                    if attempts >= self.config.retry_budget {
                        return Err(TableError::RoutingFailed { key, attempts });
                    }
                    self.refresh().await?;
                    tokio::time::sleep(self.config.retry_backoff() * attempts).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-read the metadata record and install it if newer.
    pub async fn refresh(&self) -> TableResult<()> {
        let (fresh, _) = self.store.load().await?;
        install_snapshot(&self.metadata, fresh);
        Ok(())
    }

    /// Current cached topology snapshot.
    pub fn metadata(&self) -> TableMetadata {
        self.metadata.read().clone()
    }

    /// Stop the background refresher and drop the handle.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(refresher) = self.refresher.take() {
            let _ = refresher.await;
        }
    }
}

/// Swap in `fresh` when it is newer than the cached snapshot.
fn install_snapshot(cache: &RwLock<TableMetadata>, fresh: TableMetadata) -> bool {
    let mut guard = cache.write();
    if fresh.sequence > guard.sequence {
        debug!(
            from = guard.sequence,
            to = fresh.sequence,
            shards = fresh.shards.len(),
            "installed newer topology"
        );
        *guard = fresh;
        true
    } else {
        false
    }
}

async fn refresh_loop(
    store: TableStore,
    cache: Arc<RwLock<TableMetadata>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.load().await {
                    Ok((fresh, _)) => {
                        install_snapshot(&cache, fresh);
                    }
                    Err(e) => warn!(table = store.head_oid(), error = %e, "topology refresh failed"),
                }
            }
            // Breaks on an explicit shutdown and when the sender is dropped.
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objstore::MemoryEngine;
    use rt_core::error::EngineError;
    use rt_core::table::ShardDescriptor;

    fn config() -> ClientConfig {
        ClientConfig {
            refresh_interval_secs: 3600,
            retry_budget: 3,
            retry_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_create_then_open_and_put() {
        let engine: Arc<dyn ObjectEngine> = Arc::new(MemoryEngine::new());
        let client = TableClient::create(engine.clone(), "t", config())
            .await
            .unwrap();
        client.put(42, Bytes::from_static(b"v")).await.unwrap();
        client.close().await;

        let reopened = TableClient::open(engine.clone(), "t", config())
            .await
            .unwrap();
        let metadata = reopened.metadata();
        assert_eq!(metadata.sequence, 0);
        assert_eq!(metadata.shards.len(), 1);

        let shard = ShardStore::new(engine, metadata.shards[0].shard_id.clone());
        let got = shard.read_range(0, u64::MAX, 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key, 42);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_open_missing_table() {
        let engine: Arc<dyn ObjectEngine> = Arc::new(MemoryEngine::new());
        let err = TableClient::open(engine, "missing", config())
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::Engine(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_put_surfaces_topology_gap() {
        let engine: Arc<dyn ObjectEngine> = Arc::new(MemoryEngine::new());

        // A topology violating the full-coverage invariant: [100, MAX] only.
        let mut metadata = TableMetadata::create("u".to_string(), "u.s0".to_string());
        metadata.shards = vec![ShardDescriptor::new("u.s0".to_string(), 100, u64::MAX)];
        TableStore::new(engine.clone(), "t")
            .create(&metadata)
            .await
            .unwrap();

        let client = TableClient::open(engine, "t", config()).await.unwrap();
        let err = client.put(5, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, TableError::NoOwningShard(5)));
        client.close().await;
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let engine: Arc<dyn ObjectEngine> = Arc::new(MemoryEngine::new());
        let client = TableClient::create(engine.clone(), "t", config())
            .await
            .unwrap();

        // Truncate the sole shard's accepted range without publishing a new
        // topology, so every refresh re-routes to the same rejecting shard.
        let shard_id = client.metadata().shards[0].shard_id.clone();
        let truncated = ShardHeader::new(1000, u64::MAX);
        engine
            .write(
                &shard_id,
                objstore::ShardWrite {
                    header: Some(truncated.encode().unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = client.put(5, Bytes::new()).await.unwrap_err();
        assert!(matches!(
            err,
            TableError::RoutingFailed { key: 5, attempts: 3 }
        ));
        client.close().await;
    }
}
