//! End-to-end split lifecycle against the in-memory engine.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use objstore::{MemoryEngine, ShardStore, TableStore};
use pilot::{CoordinatorConfig, SplitCoordinator, SplitPhase};
use rt_core::shard::ShardHeader;
use table::{ClientConfig, TableClient};
use uuid::Uuid;

fn client_config() -> ClientConfig {
    ClientConfig {
        refresh_interval_secs: 3600,
        retry_budget: 5,
        retry_backoff_ms: 1,
    }
}

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        poll_interval_secs: 3600,
        page_size: 100,
        apply_retry_limit: 8,
    }
}

async fn insert(client: &TableClient, keys: impl IntoIterator<Item = u64>) {
    for key in keys {
        client
            .put(key, Bytes::from(format!("v{key}")))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_split_lifecycle_and_rerouting() {
    let _ = tracing_subscriber::fmt().try_init();
    let engine = Arc::new(MemoryEngine::new());

    let client = TableClient::create(engine.clone(), "events", client_config())
        .await
        .unwrap();

    // 1001 distinct keys covering [1, 2000]: the 1001st insert crosses the
    // threshold and the midpoint of the seen bounds is 1000.
    let mut keys = vec![1, 2000];
    keys.extend(3..=1001);
    insert(&client, keys).await;

    let source_id = client.metadata().shards[0].shard_id.clone();
    let source = ShardStore::new(engine.clone(), source_id.clone());
    let (header, _) = source.read_header().await.unwrap();
    assert!(header.split_required);
    assert_eq!(header.pending_split_point, 1000);

    // One coordinator pass drives the split to completion.
    let coordinator = SplitCoordinator::new(engine.clone(), "events", coordinator_config());
    assert_eq!(coordinator.run_once().await.unwrap(), 1);

    let (metadata, _) = TableStore::new(engine.clone(), "events")
        .load()
        .await
        .unwrap();
    assert_eq!(metadata.sequence, 1);
    assert_eq!(metadata.shards.len(), 2);
    assert!(metadata.covers_domain());

    let new_desc = metadata.shards[0].clone();
    let old_desc = metadata.shards[1].clone();
    assert_eq!((new_desc.lower_bound, new_desc.upper_bound), (0, 999));
    assert_eq!((old_desc.lower_bound, old_desc.upper_bound), (1000, u64::MAX));
    assert_eq!(old_desc.shard_id, source_id);

    // Keys below the split point moved to the new shard, the rest stayed.
    let target = ShardStore::new(engine.clone(), new_desc.shard_id.clone());
    let moved = target.read_range(0, 999, 2000).await.unwrap();
    assert_eq!(moved.len(), 998);
    assert_eq!(moved[0].key, 1);
    assert_eq!(moved[0].value.as_ref(), b"v1");

    assert!(source.read_range(0, 999, 2000).await.unwrap().is_empty());
    let kept = source.read_range(1000, u64::MAX, 2000).await.unwrap();
    assert_eq!(
        kept.iter().map(|e| e.key).collect::<Vec<_>>(),
        vec![1000, 1001, 2000]
    );

    // Source header was truncated and its split request cleared.
    let (header, _) = source.read_header().await.unwrap();
    assert!(!header.split_required);
    assert_eq!(header.lower_bound, 1000);
    assert_eq!(header.migration_cursor, None);

    // The client still holds the pre-split cache. A put into the moved half
    // hits the truncated shard, recovers via refresh, and lands on the new
    // shard; a put into the kept half routes straight to the old shard.
    client.put(500, Bytes::from_static(b"after")).await.unwrap();
    let got = target.read_range(500, 500, 1).await.unwrap();
    assert_eq!(got[0].value.as_ref(), b"after");

    client.put(1500, Bytes::from_static(b"kept")).await.unwrap();
    let got = source.read_range(1500, 1500, 1).await.unwrap();
    assert_eq!(got[0].value.as_ref(), b"kept");

    assert_eq!(client.metadata().sequence, 1);

    // Nothing left to split; a second pass is a no-op.
    assert_eq!(coordinator.run_once().await.unwrap(), 0);
    let (metadata, _) = TableStore::new(engine.clone(), "events")
        .load()
        .await
        .unwrap();
    assert_eq!(metadata.sequence, 1);

    client.close().await;
}

#[tokio::test]
async fn test_stale_cache_recovery() {
    let _ = tracing_subscriber::fmt().try_init();
    let engine = Arc::new(MemoryEngine::new());

    let writer = TableClient::create(engine.clone(), "t", client_config())
        .await
        .unwrap();
    insert(&writer, 1..=1001).await;

    // Opened before the split: its cache will go stale.
    let stale = TableClient::open(engine.clone(), "t", client_config())
        .await
        .unwrap();
    assert_eq!(stale.metadata().sequence, 0);

    let coordinator = SplitCoordinator::new(engine.clone(), "t", coordinator_config());
    assert_eq!(coordinator.run_once().await.unwrap(), 1);

    // Keys 1..=1001 put the split point at 501; 42 belongs to the moved half.
    let (metadata, _) = TableStore::new(engine.clone(), "t").load().await.unwrap();
    let new_shard = metadata.locate(42).unwrap().shard_id.clone();
    assert_ne!(new_shard, metadata.locate(501).unwrap().shard_id);

    stale.put(42, Bytes::from_static(b"hello")).await.unwrap();
    assert_eq!(stale.metadata().sequence, 1);

    let got = ShardStore::new(engine.clone(), new_shard)
        .read_range(42, 42, 1)
        .await
        .unwrap();
    assert_eq!(got[0].value.as_ref(), b"hello");

    writer.close().await;
    stale.close().await;
}

#[tokio::test]
async fn test_migration_resumes_from_cursor() {
    let _ = tracing_subscriber::fmt().try_init();
    let engine = Arc::new(MemoryEngine::new());

    let client = TableClient::create(engine.clone(), "t", client_config())
        .await
        .unwrap();
    insert(&client, 1..=1001).await;

    let source_id = client.metadata().shards[0].shard_id.clone();
    let source = ShardStore::new(engine.clone(), source_id.clone());
    let (header, _) = source.read_header().await.unwrap();
    assert!(header.split_required);
    let split_point = header.pending_split_point;
    assert_eq!(split_point, 501);

    // Replay the work of a coordinator that crashed one page into the
    // migration: target created, topology split, first page copied, cursor
    // persisted.
    let table_store = TableStore::new(engine.clone(), "t");
    let (metadata, _) = table_store.load().await.unwrap();
    let target_id = format!("{}.{}", metadata.unique_id, Uuid::new_v4());
    let target = ShardStore::new(engine.clone(), target_id.clone());
    target
        .create_with_header(&ShardHeader::new(0, split_point - 1))
        .await
        .unwrap();
    table_store
        .apply_split(0, &source_id, split_point, target_id.clone())
        .await
        .unwrap();

    let page = source.read_range(0, split_point - 1, 100).await.unwrap();
    assert_eq!(page.len(), 100);
    target.restore_entries(&page).await.unwrap();
    source.advance_cursor(101).await.unwrap();

    // A fresh coordinator adopts the persisted state and finishes the job.
    let coordinator = SplitCoordinator::new(engine.clone(), "t", coordinator_config());
    assert_eq!(coordinator.run_once().await.unwrap(), 1);

    let task = coordinator.tasks().pop().unwrap();
    assert_eq!(task.phase, SplitPhase::Completed);
    assert_eq!(task.target_shard.as_deref(), Some(target_id.as_str()));

    // No key from the source range was lost or duplicated.
    let moved = target.read_range(0, split_point - 1, 2000).await.unwrap();
    assert_eq!(moved.len(), 500);
    assert_eq!(moved.first().unwrap().key, 1);
    assert_eq!(moved.last().unwrap().key, 500);
    assert_eq!(moved[41].key, 42);
    assert_eq!(moved[41].value.as_ref(), b"v42");

    assert!(source
        .read_range(0, split_point - 1, 10)
        .await
        .unwrap()
        .is_empty());
    let kept = source.read_range(split_point, u64::MAX, 2000).await.unwrap();
    assert_eq!(kept.len(), 501);

    let (header, _) = source.read_header().await.unwrap();
    assert!(!header.split_required);
    assert_eq!(header.lower_bound, split_point);
    assert_eq!(header.migration_cursor, None);

    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poll_loop_detects_and_stops() {
    let _ = tracing_subscriber::fmt().try_init();
    let engine = Arc::new(MemoryEngine::new());

    let client = TableClient::create(engine.clone(), "t", client_config())
        .await
        .unwrap();
    insert(&client, 1..=1001).await;

    let coordinator = Arc::new(SplitCoordinator::new(
        engine.clone(),
        "t",
        CoordinatorConfig {
            poll_interval_secs: 1,
            page_size: 200,
            apply_retry_limit: 8,
        },
    ));
    let handle = coordinator.clone().spawn();

    // The first poll fires immediately; wait for the topology to change.
    let table_store = TableStore::new(engine.clone(), "t");
    let mut sequence = 0;
    for _ in 0..50 {
        sequence = table_store.load().await.unwrap().0.sequence;
        if sequence > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(sequence, 1);

    handle.stop().await;
    client.close().await;
}
