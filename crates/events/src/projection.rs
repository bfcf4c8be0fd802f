use crate::{Event, EventEnvelope};

/// A projection builds a disposable read model from committed events.
///
/// Read models are views; the order record is the source of truth. A
/// projection can be dropped and rebuilt by replaying envelopes.
///
/// `apply` must be **idempotent** under at-least-once delivery. The usual
/// strategy is to keep a per-aggregate cursor of the last applied
/// `EventEnvelope::position()` and skip anything at or below it.
pub trait Projection {
    type Ev: Event;

    /// Apply a single envelope, updating the read model.
    ///
    /// Irrelevant events are ignored. Structured failures (e.g. payload
    /// decoding) are reported by the concrete projection's own entry points.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
