use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use brokerdesk_core::{ExpectedVersion, Snapshot};

use super::r#trait::{RecordStore, StoreError};

/// In-memory versioned record store.
///
/// Intended for tests/dev and the CLI. Can be switched offline to exercise
/// the `Unavailable` path.
#[derive(Debug)]
pub struct InMemoryRecordStore<A: Snapshot> {
    records: RwLock<HashMap<A::Id, A>>,
    offline: AtomicBool,
}

impl<A: Snapshot> InMemoryRecordStore<A> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with `Unavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }
}

impl<A: Snapshot> Default for InMemoryRecordStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Snapshot> RecordStore<A> for InMemoryRecordStore<A> {
    fn load(&self, id: &A::Id) -> Result<A, StoreError> {
        self.ensure_online()?;
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        records.get(id).cloned().ok_or(StoreError::NotFound)
    }

    fn save(&self, record: &A) -> Result<u64, StoreError> {
        self.ensure_online()?;
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        let stored_version = records.get(record.id()).map(|r| r.version());
        if !ExpectedVersion::of(record.version()).matches(stored_version) {
            return Err(StoreError::Conflict {
                expected: record.version(),
                actual: stored_version.unwrap_or(0),
            });
        }

        let next = record.version() + 1;
        let mut stored = record.clone();
        stored.set_version(next);
        records.insert(record.id().clone(), stored);
        Ok(next)
    }
}
