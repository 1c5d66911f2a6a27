use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use super::record::MemoryRecord;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("memory backend storage failure: {0}")]
    Storage(String),
    #[error("memory backend decode failure: {0}")]
    Decode(String),
}

/// Durable form of the memory store. Reloaded in full at process start.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Every persisted record. An absent backing store yields an empty list.
    async fn load_all(&self) -> Result<Vec<MemoryRecord>, BackendError>;
    async fn upsert(&self, record: &MemoryRecord) -> Result<(), BackendError>;
    async fn remove(&self, key: &str) -> Result<bool, BackendError>;

    /// Writes every record. Backends that support transactions apply the batch
    /// all-or-nothing.
    async fn upsert_many(&self, records: &[MemoryRecord]) -> Result<(), BackendError> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(())
    }

    /// Removes every key, returning how many existed.
    async fn remove_many(&self, keys: &[String]) -> Result<usize, BackendError> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Process-local backend. Clones share storage, so a second `MemoryStore`
/// opened over a clone observes what the first one committed.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend {
    records: Arc<Mutex<BTreeMap<String, MemoryRecord>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, MemoryRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn load_all(&self) -> Result<Vec<MemoryRecord>, BackendError> {
        Ok(self.records().values().cloned().collect())
    }

    async fn upsert(&self, record: &MemoryRecord) -> Result<(), BackendError> {
        self.records().insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.records().remove(key).is_some())
    }
}
