//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the current snapshot (or start from an empty aggregate)
//!   ↓
//! 2. Handle command (pure decision logic, produces events)
//!   ↓
//! 3. Apply every decided event to a copy of the snapshot
//!   ↓
//! 4. Save the copy, conditioned on the loaded version
//!   ↓
//! 5. Run post-commit effects
//!   ↓
//! 6. Publish the committed events to the bus
//! ```
//!
//! All events of one command land in a single save, so a status change, its
//! system message and the regenerated timeline persist together or not at
//! all. A save whose version precondition fails surfaces as
//! `DispatchError::Conflict`; the dispatcher never retries or merges.
//! Steps 4 to 6 run under one commit gate, so subscribers receive commits
//! in the order their versions were assigned.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use brokerdesk_core::{Aggregate, AggregateId, DomainError, Snapshot};
use brokerdesk_events::{Event, EventBus, EventEnvelope};

use crate::record_store::{RecordStore, StoreError};
use crate::replies::ScheduleError;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A field constraint failed (e.g. negative amount, missing reference).
    #[error("validation failed: {0}")]
    Validation(String),
    /// A required argument was empty (reason, document list, content).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is not legal from the current status.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    /// A domain invariant failed (deterministic).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// No record exists for the requested id.
    #[error("not found")]
    NotFound,
    /// A creation command targeted an id that is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Stale version at save time; reload and retry the whole operation.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The record store failed for infrastructure reasons.
    #[error("record store error: {0}")]
    Store(StoreError),
    /// Event payload serialization failed (nothing was saved).
    #[error("event serialization failed: {0}")]
    Serialize(String),
    /// Publication failed after a successful save at `version`.
    #[error("event publication failed after commit at version {version}: {message}")]
    Publish { version: u64, message: String },
    /// The auto-reply schedule rejected an operation.
    #[error("reply schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

impl DispatchError {
    /// Whether the caller may reload and retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Conflict(_) => true,
            DispatchError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => DispatchError::NotFound,
            StoreError::Conflict { expected, actual } => DispatchError::Conflict(format!(
                "record changed since it was read (expected version {expected}, found {actual})"
            )),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidArgument(msg) => DispatchError::InvalidArgument(msg),
            DomainError::IllegalTransition(msg) => DispatchError::IllegalTransition(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::AlreadyExists(msg) => DispatchError::AlreadyExists(msg),
        }
    }
}

/// Outcome of a dispatched command: the new snapshot and what was committed.
///
/// `events` is empty when the command decided nothing (e.g. marking an
/// already-read conversation as read); no save happened in that case.
#[derive(Debug, Clone)]
pub struct Committed<A, E> {
    pub snapshot: A,
    pub events: Vec<EventEnvelope<E>>,
}

impl<A, E> Committed<A, E> {
    pub fn into_snapshot(self) -> A {
        self.snapshot
    }

    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Reusable command execution engine for snapshot-persisted aggregates.
///
/// ## Execution Guarantees
///
/// - **Atomicity**: one conditional save per command, covering every event
/// - **Ordering**: events are published only after the save succeeded
/// - **Isolation**: each command touches a single aggregate
///
/// ## At-Least-Once Delivery
///
/// If publication fails after the save, `DispatchError::Publish` reports the
/// committed version. Post-commit effects have already run by then.
/// Subscribers dedupe on `EventEnvelope::position()`.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    commit_gate: Mutex<()>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            commit_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load the current snapshot of an aggregate.
    pub fn load<A>(&self, id: &A::Id) -> Result<A, DispatchError>
    where
        A: Snapshot,
        S: RecordStore<A>,
    {
        Ok(self.store.load(id)?)
    }

    /// Dispatch a command through load → decide → apply → save → publish.
    ///
    /// `make_aggregate` builds the empty aggregate used when no record exists
    /// yet; creation commands succeed against it, others get `NotFound`
    /// from the aggregate itself.
    pub fn dispatch<A>(
        &self,
        aggregate_type: &str,
        id: &A::Id,
        command: &A::Command,
        make_aggregate: impl FnOnce(&A::Id) -> A,
    ) -> Result<Committed<A, A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + Snapshot,
        A::Id: Into<AggregateId>,
        A::Event: Event + Serialize,
        S: RecordStore<A>,
    {
        self.dispatch_with(aggregate_type, id, command, make_aggregate, |_| Ok(()))
    }

    /// Like [`dispatch`](Self::dispatch), running `on_commit` after the save
    /// and before publication.
    ///
    /// `on_commit` runs exactly once for every command that saved, even when
    /// publication fails afterwards. It is skipped for commands that decided
    /// nothing. If both fail, its error is returned rather than `Publish`.
    pub fn dispatch_with<A, F>(
        &self,
        aggregate_type: &str,
        id: &A::Id,
        command: &A::Command,
        make_aggregate: impl FnOnce(&A::Id) -> A,
        on_commit: F,
    ) -> Result<Committed<A, A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + Snapshot,
        A::Id: Into<AggregateId>,
        A::Event: Event + Serialize,
        S: RecordStore<A>,
        F: FnOnce(&Committed<A, A::Event>) -> Result<(), DispatchError>,
    {
        // 1) Load current snapshot
        let current = match self.store.load(id) {
            Ok(snapshot) => snapshot,
            Err(StoreError::NotFound) => make_aggregate(id),
            Err(e) => return Err(e.into()),
        };

        // 2) Decide events (no mutation)
        let decided = current.handle(command)?;
        if decided.is_empty() {
            debug!(aggregate_type, version = current.version(), "command decided no events");
            return Ok(Committed {
                snapshot: current,
                events: Vec::new(),
            });
        }

        // 3) Evolve a copy; the loaded version stays the save precondition
        let mut next = current.clone();
        for event in &decided {
            next.apply(event);
        }

        let payloads = decided
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DispatchError::Serialize(e.to_string()))?;

        // 4) Conditional save; the gate stays held through publication
        let _gate = self.commit_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let version = self.store.save(&next)?;
        next.set_version(version);

        let aggregate_id: AggregateId = id.clone().into();
        let envelopes: Vec<EventEnvelope<A::Event>> = decided
            .into_iter()
            .enumerate()
            .map(|(index, event)| {
                EventEnvelope::committed(aggregate_id, aggregate_type, version, index as u32, event)
            })
            .collect();

        debug!(
            aggregate_type,
            aggregate_id = %aggregate_id,
            version,
            events = envelopes.len(),
            "command committed"
        );

        let committed = Committed {
            snapshot: next,
            events: envelopes,
        };

        // 5) Post-commit effects
        let effects = on_commit(&committed);

        // 6) Publish committed events (after save)
        let mut published = Ok(());
        for (envelope, payload) in committed.events.iter().zip(payloads) {
            let message = envelope.clone().map_payload(|_| payload);
            if let Err(e) = self.bus.publish(message) {
                warn!(
                    aggregate_id = %aggregate_id,
                    version,
                    event_type = envelope.event_type(),
                    error = ?e,
                    "event publication failed after commit"
                );
                published = Err(DispatchError::Publish {
                    version,
                    message: format!("{e:?}"),
                });
                break;
            }
        }

        effects?;
        published?;
        Ok(committed)
    }
}
