//! Split execution
//!
//! The coordinator polls shard headers and drives each requested split
//! through `Creating → Migrating → Finalizing`. All durable state lives in
//! the shard headers and the table metadata, so phases are re-derived from
//! what is persisted: a coordinator restarted mid-migration resumes at the
//! `migration_cursor`, one restarted mid-finalize re-runs the fence and
//! sweep, and one that lost the metadata race adopts the winner's topology.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use objstore::{ObjectEngine, ShardStore, TableStore};
use rt_core::error::{TableError, TableResult};
use rt_core::shard::ShardHeader;
use rt_core::table::ShardId;

use crate::config::CoordinatorConfig;
use crate::task::{SplitPhase, SplitTask, TaskBook};

/// Background process turning split requests into topology changes.
pub struct SplitCoordinator {
    engine: Arc<dyn ObjectEngine>,
    table: TableStore,
    config: CoordinatorConfig,
    tasks: TaskBook,
}

/// Handle to a spawned coordinator loop.
pub struct CoordinatorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Signal shutdown and wait for the loop to exit. In-flight shard
    /// operations are atomic, so stopping between operations is always safe.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

impl SplitCoordinator {
    pub fn new(
        engine: Arc<dyn ObjectEngine>,
        table_name: &str,
        config: CoordinatorConfig,
    ) -> Self {
        let table = TableStore::new(engine.clone(), table_name);
        Self {
            engine,
            table,
            config,
            tasks: TaskBook::new(),
        }
    }

    /// Spawn the polling loop; stop it through the returned handle.
    pub fn spawn(self: Arc<Self>) -> CoordinatorHandle {
        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(rx).await });
        CoordinatorHandle { shutdown, join }
    }

    /// Poll until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        info!(table = self.table.head_oid(), "split coordinator started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(0) => {}
                        Ok(splits) => info!(splits, "split poll completed"),
                        Err(e) => warn!(error = %e, "split poll failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(table = self.table.head_oid(), "split coordinator stopped");
    }

    /// One detection pass over every known shard. Returns the number of
    /// splits driven to completion.
    pub async fn run_once(&self) -> TableResult<usize> {
        let (metadata, _) = self.table.load().await?;
        let mut completed = 0;

        for descriptor in &metadata.shards {
            let source_id = &descriptor.shard_id;
            if self.tasks.is_active(source_id) {
                continue;
            }

            let source = ShardStore::new(self.engine.clone(), source_id.clone());
            let header = match source.read_header().await {
                Ok((header, _)) => header,
                Err(e) => {
                    warn!(shard = %source_id, error = %e, "failed to read shard header");
                    continue;
                }
            };
            if !header.split_required {
                continue;
            }

            self.tasks.begin(source_id, header.pending_split_point);
            match self.execute_split(&source, header.pending_split_point).await {
                Ok(()) => {
                    self.tasks.set_phase(source_id, SplitPhase::Completed);
                    completed += 1;
                }
                Err(e) => {
                    error!(shard = %source_id, error = %e, "split failed");
                    self.tasks.set_phase(source_id, SplitPhase::Failed(e.to_string()));
                }
            }
        }

        Ok(completed)
    }

    /// Split tasks recorded by this instance.
    pub fn tasks(&self) -> Vec<SplitTask> {
        self.tasks.all()
    }

    /// Drive one shard's split to completion.
    async fn execute_split(&self, source: &ShardStore, split_point: u64) -> TableResult<()> {
        let Some(target_id) = self.ensure_topology_split(source, split_point).await? else {
            // The request vanished: another coordinator finalized first.
            return Ok(());
        };
        self.tasks.set_target(source.shard_id(), target_id.clone());
        let target = ShardStore::new(self.engine.clone(), target_id);

        self.tasks.set_phase(source.shard_id(), SplitPhase::Migrating);
        let copied = self.migrate(source, &target, split_point).await?;

        self.tasks.set_phase(source.shard_id(), SplitPhase::Finalizing);
        source.fence().await?;
        // Writers that raced the last pages are frozen now; one sweep picks
        // them up before anything is deleted from the source.
        let swept = self.sweep(source, &target, split_point).await?;

        if source.finish_split().await? {
            info!(
                source = source.shard_id(),
                target = target.shard_id(),
                split_point,
                copied,
                swept,
                "split completed"
            );
        } else {
            debug!(
                source = source.shard_id(),
                "split already finalized by another coordinator"
            );
        }
        Ok(())
    }

    /// Make the topology reflect the split, creating the target shard if this
    /// coordinator gets there first. Returns the target shard id, or `None`
    /// when the split request no longer exists.
    async fn ensure_topology_split(
        &self,
        source: &ShardStore,
        split_point: u64,
    ) -> TableResult<Option<ShardId>> {
        let mut attempts = 0;
        loop {
            let (header, _) = source.read_header().await?;
            if !header.split_required {
                return Ok(None);
            }

            let (metadata, _) = self.table.load().await?;
            let lower_owner = metadata.locate(split_point - 1)?;
            if lower_owner.shard_id != source.shard_id() {
                // Already split, by an earlier run or another coordinator.
                return Ok(Some(lower_owner.shard_id.clone()));
            }

            self.tasks.set_phase(source.shard_id(), SplitPhase::Creating);
            let target_id = format!("{}.{}", metadata.unique_id, Uuid::new_v4());
            let target_header = ShardHeader::new(lower_owner.lower_bound, split_point - 1);
            ShardStore::new(self.engine.clone(), target_id.clone())
                .create_with_header(&target_header)
                .await?;

            match self
                .table
                .apply_split(
                    metadata.sequence,
                    source.shard_id(),
                    split_point,
                    target_id.clone(),
                )
                .await
            {
                Ok(updated) => {
                    info!(
                        source = source.shard_id(),
                        target = %target_id,
                        split_point,
                        sequence = updated.sequence,
                        "topology split applied"
                    );
                    return Ok(Some(target_id));
                }
                Err(TableError::ConcurrentModification { expected, actual }) => {
                    attempts += 1;
                    warn!(
                        source = source.shard_id(),
                        expected, actual, attempts, "lost metadata race, re-reading"
                    );
                    // Drop the shard object created for the lost attempt.
                    let _ = self.engine.remove(&target_id).await;
                    if attempts >= self.config.apply_retry_limit {
                        return Err(TableError::ConcurrentModification { expected, actual });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Copy the migrated range in pages, persisting the cursor after each
    /// page. Safe to repeat and to resume: destination writes are idempotent
    /// per key, and a crash re-copies at most the last unconfirmed page.
    async fn migrate(
        &self,
        source: &ShardStore,
        target: &ShardStore,
        split_point: u64,
    ) -> TableResult<u64> {
        let (header, _) = source.read_header().await?;
        if let Some(resume) = header.migration_cursor {
            info!(
                source = source.shard_id(),
                resume, "resuming migration from persisted cursor"
            );
        }
        let mut cursor = header.migration_cursor.unwrap_or(header.lower_bound);
        let mut copied: u64 = 0;

        while cursor < split_point {
            let page = source
                .read_range(cursor, split_point - 1, self.config.page_size)
                .await?;
            let Some(last) = page.last() else { break };
            let next = last.key + 1;

            target.restore_entries(&page).await?;
            source.advance_cursor(next).await?;

            copied += page.len() as u64;
            debug!(
                source = source.shard_id(),
                cursor = next,
                copied,
                "migrated page"
            );
            cursor = next;
        }

        Ok(copied)
    }

    /// Re-read the fenced range once and copy anything the paged migration
    /// missed (writes accepted while a page was in flight).
    async fn sweep(
        &self,
        source: &ShardStore,
        target: &ShardStore,
        split_point: u64,
    ) -> TableResult<u64> {
        let mut cursor = 0u64;
        let mut swept: u64 = 0;
        loop {
            let page = source
                .read_range(cursor, split_point - 1, self.config.page_size)
                .await?;
            let Some(last) = page.last() else { break };
            target.restore_entries(&page).await?;
            swept += page.len() as u64;
            if last.key >= split_point - 1 {
                break;
            }
            cursor = last.key + 1;
        }
        if swept > 0 {
            debug!(source = source.shard_id(), swept, "post-fence sweep copied entries");
        }
        Ok(swept)
    }
}
