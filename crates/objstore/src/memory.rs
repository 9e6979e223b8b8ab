//! In-memory storage engine
//!
//! Backs tests and embedded use. Every operation takes the engine lock for
//! its full duration, which gives exactly the per-object serialization and
//! write atomicity the `ObjectEngine` contract requires.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rt_core::error::{EngineError, EngineResult};

use crate::engine::{Entry, HeaderBlob, ObjectEngine, ObjectRecord, ShardWrite};

#[derive(Debug, Default)]
struct MemObject {
    header: Bytes,
    entries: BTreeMap<u64, Bytes>,
    record: Bytes,
    /// Bumped on every `write`; preconditions check against it.
    write_version: u64,
    /// Bumped on every `write_record`.
    record_version: u64,
}

/// Heap-backed `ObjectEngine`.
#[derive(Default)]
pub struct MemoryEngine {
    objects: Mutex<HashMap<String, MemObject>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored in an object, for tests.
    pub fn entry_count(&self, oid: &str) -> usize {
        self.objects
            .lock()
            .get(oid)
            .map(|o| o.entries.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObjectEngine for MemoryEngine {
    async fn create(&self, oid: &str) -> EngineResult<()> {
        let mut objects = self.objects.lock();
        if objects.contains_key(oid) {
            return Err(EngineError::AlreadyExists(oid.to_string()));
        }
        objects.insert(oid.to_string(), MemObject::default());
        Ok(())
    }

    async fn remove(&self, oid: &str) -> EngineResult<()> {
        self.objects
            .lock()
            .remove(oid)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(oid.to_string()))
    }

    async fn read_header(&self, oid: &str) -> EngineResult<HeaderBlob> {
        let objects = self.objects.lock();
        let object = objects
            .get(oid)
            .ok_or_else(|| EngineError::NotFound(oid.to_string()))?;
        Ok(HeaderBlob {
            data: object.header.clone(),
            version: object.write_version,
        })
    }

    async fn write(&self, oid: &str, write: ShardWrite) -> EngineResult<()> {
        let mut objects = self.objects.lock();
        let object = objects
            .get_mut(oid)
            .ok_or_else(|| EngineError::NotFound(oid.to_string()))?;

        if let Some(expected) = write.expect_version {
            if object.write_version != expected {
                return Err(EngineError::VersionMismatch {
                    oid: oid.to_string(),
                    expected,
                    actual: object.write_version,
                });
            }
        }

        if let Some(header) = write.header {
            object.header = header;
        }
        for entry in write.set {
            object.entries.insert(entry.key, entry.value);
        }
        for entry in write.set_if_absent {
            object.entries.entry(entry.key).or_insert(entry.value);
        }
        if let Some((lower, upper)) = write.delete_range {
            let keys: Vec<u64> = object.entries.range(lower..=upper).map(|(k, _)| *k).collect();
            for key in keys {
                object.entries.remove(&key);
            }
        }

        object.write_version += 1;
        Ok(())
    }

    async fn read_range(
        &self,
        oid: &str,
        lower: u64,
        upper: u64,
        limit: usize,
    ) -> EngineResult<Vec<Entry>> {
        let objects = self.objects.lock();
        let object = objects
            .get(oid)
            .ok_or_else(|| EngineError::NotFound(oid.to_string()))?;
        Ok(object
            .entries
            .range(lower..=upper)
            .take(limit)
            .map(|(k, v)| Entry::new(*k, v.clone()))
            .collect())
    }

    async fn read_record(&self, oid: &str) -> EngineResult<ObjectRecord> {
        let objects = self.objects.lock();
        let object = objects
            .get(oid)
            .ok_or_else(|| EngineError::NotFound(oid.to_string()))?;
        Ok(ObjectRecord {
            data: object.record.clone(),
            version: object.record_version,
        })
    }

    async fn write_record(
        &self,
        oid: &str,
        data: Bytes,
        expected_version: Option<u64>,
    ) -> EngineResult<u64> {
        let mut objects = self.objects.lock();
        match expected_version {
            Some(expected) => {
                let object = objects
                    .get_mut(oid)
                    .ok_or_else(|| EngineError::NotFound(oid.to_string()))?;
                if object.record_version != expected {
                    return Err(EngineError::VersionMismatch {
                        oid: oid.to_string(),
                        expected,
                        actual: object.record_version,
                    });
                }
                object.record = data;
                object.record_version += 1;
                Ok(object.record_version)
            }
            None => {
                let object = objects.entry(oid.to_string()).or_default();
                object.record = data;
                object.record_version += 1;
                Ok(object.record_version)
            }
        }
    }
}
