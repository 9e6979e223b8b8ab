//! Split task bookkeeping
//!
//! In-process record of the splits this coordinator instance is driving or
//! has driven, keyed by source shard. Purely observational: the authoritative
//! split state lives in the shard headers and the table metadata, which is
//! what makes crash recovery and cooperative coordinators work.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use rt_core::table::ShardId;

/// Phase of a split as driven by this coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitPhase {
    /// Split request observed, not yet acted on.
    Pending,
    /// Allocating the new shard and applying the topology change.
    Creating,
    /// Copying the migrated range in pages.
    Migrating,
    /// Fencing, sweeping stragglers and deleting the migrated range.
    Finalizing,
    /// Split completed.
    Completed,
    /// Split aborted with an error; retried on a later poll.
    Failed(String),
}

impl SplitPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SplitPhase::Completed | SplitPhase::Failed(_))
    }
}

impl std::fmt::Display for SplitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitPhase::Pending => write!(f, "pending"),
            SplitPhase::Creating => write!(f, "creating"),
            SplitPhase::Migrating => write!(f, "migrating"),
            SplitPhase::Finalizing => write!(f, "finalizing"),
            SplitPhase::Completed => write!(f, "completed"),
            SplitPhase::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// One split as seen by this coordinator.
#[derive(Debug, Clone)]
pub struct SplitTask {
    /// Task ID.
    pub id: String,
    /// Shard being split.
    pub source_shard: ShardId,
    /// New shard taking the lower half; known once created or discovered.
    pub target_shard: Option<ShardId>,
    /// Split point key.
    pub split_point: u64,
    /// Current phase.
    pub phase: SplitPhase,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last phase change.
    pub updated_at: DateTime<Utc>,
}

impl SplitTask {
    fn new(source_shard: ShardId, split_point: u64) -> Self {
        let now = Utc::now();
        let id = format!("split_{}_{}_{}", source_shard, split_point, now.timestamp_millis());
        Self {
            id,
            source_shard,
            target_shard: None,
            split_point,
            phase: SplitPhase::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Task registry for one coordinator instance.
#[derive(Default)]
pub struct TaskBook {
    tasks: RwLock<HashMap<ShardId, SplitTask>>,
}

impl TaskBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a non-terminal split is recorded for `source`.
    pub fn is_active(&self, source: &str) -> bool {
        self.tasks
            .read()
            .get(source)
            .is_some_and(|t| !t.phase.is_terminal())
    }

    /// Start tracking a split of `source`, replacing any finished record.
    pub fn begin(&self, source: &ShardId, split_point: u64) {
        self.tasks
            .write()
            .insert(source.clone(), SplitTask::new(source.clone(), split_point));
    }

    pub fn set_phase(&self, source: &str, phase: SplitPhase) {
        if let Some(task) = self.tasks.write().get_mut(source) {
            task.phase = phase;
            task.updated_at = Utc::now();
        }
    }

    pub fn set_target(&self, source: &str, target: ShardId) {
        if let Some(task) = self.tasks.write().get_mut(source) {
            task.target_shard = Some(target);
            task.updated_at = Utc::now();
        }
    }

    pub fn get(&self, source: &str) -> Option<SplitTask> {
        self.tasks.read().get(source).cloned()
    }

    pub fn all(&self) -> Vec<SplitTask> {
        self.tasks.read().values().cloned().collect()
    }
}
