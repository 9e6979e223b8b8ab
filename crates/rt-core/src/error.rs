//! Error taxonomy
//!
//! Two layers: `EngineError` is what the object-storage engine can fail with,
//! `TableError` is what table operations surface to callers. Transient
//! topology races (`OutOfRange`, `ConcurrentModification`) are retried by
//! their owners and only escape when a retry budget is exhausted.

use thiserror::Error;

/// Errors surfaced by the object-storage engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("write conflict on {oid}: expected version {expected}, found {actual}")]
    VersionMismatch {
        oid: String,
        expected: u64,
        actual: u64,
    },
    #[error("storage engine I/O failure: {0}")]
    Io(String),
}

/// Errors surfaced by table operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// The key does not belong to the shard that was addressed. Recoverable
    /// at the client by refreshing the topology and retrying.
    #[error("key {key} is outside the accepted range [{lower}, {upper}]")]
    OutOfRange { key: u64, lower: u64, upper: u64 },

    /// The topology changed underneath an optimistic update. Recoverable at
    /// the coordinator by re-reading and retrying the split decision.
    #[error("metadata sequence mismatch: expected {expected}, found {actual}")]
    ConcurrentModification { expected: u64, actual: u64 },

    /// A persisted record failed to decode. Fatal for the affected
    /// shard/table; never silently repaired.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    /// No descriptor covers the key. The topology invariant guarantees full
    /// coverage, so this signals a corrupted or impossible topology.
    #[error("no shard owns key {0}")]
    NoOwningShard(u64),

    /// The client retry budget was exhausted without a successful route.
    #[error("put of key {key} failed after {attempts} attempts")]
    RoutingFailed { key: u64, attempts: u32 },

    /// Underlying storage engine failure, propagated unchanged.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type TableResult<T> = Result<T, TableError>;

impl TableError {
    /// Whether a client put may recover from this error by refreshing its
    /// cached topology and retrying.
    pub fn is_stale_route(&self) -> bool {
        matches!(self, TableError::OutOfRange { .. })
    }
}
