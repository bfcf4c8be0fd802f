use std::sync::Arc;

use thiserror::Error;

use brokerdesk_core::Snapshot;

/// Record store operation error.
///
/// These are **infrastructure errors** (missing records, stale versions,
/// outages) as opposed to domain errors (validation, illegal transitions).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// The stored version moved since the record was read.
    #[error("version conflict (expected {expected}, found {actual})")]
    Conflict { expected: u64, actual: u64 },

    /// The backend could not be reached; the outcome of a save is unknown.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether reloading and retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Unavailable(_))
    }
}

/// Versioned key/value store holding one snapshot per aggregate.
///
/// ## Save semantics
///
/// `save(record)` succeeds only if the stored version equals
/// `record.version()` (`0` meaning "must not exist yet"). On success the
/// stored copy gets `version + 1`, which is returned. A stale version is
/// rejected with `Conflict` and never merged.
///
/// ## Load semantics
///
/// `load(id)` returns the latest saved snapshot, carrying its version, or
/// `NotFound`.
///
/// Implementations must make the check-and-replace step atomic per id.
pub trait RecordStore<A: Snapshot>: Send + Sync {
    fn load(&self, id: &A::Id) -> Result<A, StoreError>;

    fn save(&self, record: &A) -> Result<u64, StoreError>;
}

impl<A, S> RecordStore<A> for Arc<S>
where
    A: Snapshot,
    S: RecordStore<A> + ?Sized,
{
    fn load(&self, id: &A::Id) -> Result<A, StoreError> {
        (**self).load(id)
    }

    fn save(&self, record: &A) -> Result<u64, StoreError> {
        (**self).save(record)
    }
}
