//! Staff-facing order board: one summary row per order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use brokerdesk_core::AggregateId;
use brokerdesk_events::{EventEnvelope, Projection};
use brokerdesk_orders::{
    DocumentKind, MessageId, OrderEvent, OrderId, OrderStatus, Sender, AGGREGATE_TYPE,
};

use crate::read_model::ReadStore;

pub const PROJECTION_NAME: &str = "orders.board";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBoardEntry {
    pub order_id: OrderId,
    pub client_ref: String,
    pub status: OrderStatus,
    pub document_counts: BTreeMap<DocumentKind, usize>,
    pub message_count: usize,
    /// Unread messages keyed by id, with their sender.
    pub unread: BTreeMap<MessageId, Sender>,
    pub checkpoints_completed: usize,
    pub checkpoints_total: usize,
    pub last_activity_at: DateTime<Utc>,
}

impl OrderBoardEntry {
    fn new(order_id: OrderId, at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            client_ref: String::new(),
            status: OrderStatus::PendingReview,
            document_counts: BTreeMap::new(),
            message_count: 0,
            unread: BTreeMap::new(),
            checkpoints_completed: 0,
            checkpoints_total: 0,
            last_activity_at: at,
        }
    }

    /// Unread messages not written by `viewer`.
    pub fn unread_for(&self, viewer: Sender) -> usize {
        self.unread.values().filter(|sender| **sender != viewer).count()
    }

    pub fn staff_unread(&self) -> usize {
        self.unread_for(Sender::Staff)
    }

    pub fn document_count(&self, kind: DocumentKind) -> usize {
        self.document_counts.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderBoardError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),
    #[error("event order_id does not match envelope aggregate_id")]
    AggregateMismatch,
}

/// Envelopes that arrived ahead of a gap, keyed by position.
type Held = BTreeMap<(u64, u32), (DateTime<Utc>, OrderEvent)>;

/// Order board projection.
///
/// Keeps a `(version, index)` cursor per order. Envelopes at or below the
/// cursor are duplicates and are skipped. An envelope past a gap is held
/// back and applied once the missing positions arrive; the next position
/// after `(v, i)` is `(v, i + 1)` or `(v + 1, 0)`.
#[derive(Debug)]
pub struct OrderBoardProjection<S>
where
    S: ReadStore<OrderId, OrderBoardEntry>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, (u64, u32)>>,
    held: Mutex<HashMap<AggregateId, Held>>,
}

impl<S> OrderBoardProjection<S>
where
    S: ReadStore<OrderId, OrderBoardEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<OrderBoardEntry> {
        self.store.get(order_id)
    }

    /// All rows, most recently active first.
    pub fn list(&self) -> Vec<OrderBoardEntry> {
        let mut rows = self.store.list();
        rows.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then(a.order_id.cmp(&b.order_id))
        });
        rows
    }

    pub fn list_by_status(&self, status: OrderStatus) -> Vec<OrderBoardEntry> {
        self.list().into_iter().filter(|e| e.status == status).collect()
    }

    /// Envelopes of `order_id` waiting for an earlier position.
    pub fn held_back(&self, order_id: &OrderId) -> usize {
        self.held
            .lock()
            .map(|held| held.get(&order_id.as_aggregate_id()).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    fn cursor(&self, aggregate_id: AggregateId) -> Option<(u64, u32)> {
        self.cursors.read().ok()?.get(&aggregate_id).copied()
    }

    fn update_cursor(&self, aggregate_id: AggregateId, position: (u64, u32)) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, position);
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), OrderBoardError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let ev: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OrderBoardError::Deserialize(e.to_string()))?;

        self.apply_event(envelope.aggregate_id(), envelope.position(), envelope.occurred_at(), ev)
    }

    fn apply_event(
        &self,
        aggregate_id: AggregateId,
        position: (u64, u32),
        occurred_at: DateTime<Utc>,
        ev: OrderEvent,
    ) -> Result<(), OrderBoardError> {
        if event_order_id(&ev).as_aggregate_id() != aggregate_id {
            return Err(OrderBoardError::AggregateMismatch);
        }

        if let Some(last) = self.cursor(aggregate_id) {
            if position <= last {
                return Ok(());
            }
            if !follows(last, position) {
                debug!(
                    projection = PROJECTION_NAME,
                    aggregate_id = %aggregate_id,
                    ?last,
                    ?position,
                    "holding envelope until the gap fills"
                );
                if let Ok(mut held) = self.held.lock() {
                    held.entry(aggregate_id)
                        .or_default()
                        .insert(position, (occurred_at, ev));
                }
                return Ok(());
            }
        }

        self.write_row(aggregate_id, position, occurred_at, &ev);
        self.release_held(aggregate_id);
        Ok(())
    }

    /// Apply held envelopes that now follow the cursor.
    fn release_held(&self, aggregate_id: AggregateId) {
        loop {
            let Some(last) = self.cursor(aggregate_id) else {
                return;
            };
            let next = {
                let Ok(mut held) = self.held.lock() else {
                    return;
                };
                let Some(queue) = held.get_mut(&aggregate_id) else {
                    return;
                };
                while queue.first_key_value().is_some_and(|(pos, _)| *pos <= last) {
                    queue.pop_first();
                }
                let ready = queue
                    .first_key_value()
                    .is_some_and(|(pos, _)| follows(last, *pos));
                let next = if ready { queue.pop_first() } else { None };
                if queue.is_empty() {
                    held.remove(&aggregate_id);
                }
                next
            };
            match next {
                Some((position, (occurred_at, ev))) => {
                    self.write_row(aggregate_id, position, occurred_at, &ev);
                }
                None => return,
            }
        }
    }

    fn write_row(
        &self,
        aggregate_id: AggregateId,
        position: (u64, u32),
        occurred_at: DateTime<Utc>,
        ev: &OrderEvent,
    ) {
        let order_id = event_order_id(ev);
        let mut entry = self
            .store
            .get(&order_id)
            .unwrap_or_else(|| OrderBoardEntry::new(order_id, occurred_at));

        match ev {
            OrderEvent::OrderPlaced(e) => {
                entry.client_ref = e.client_ref.clone();
                entry.status = OrderStatus::PendingReview;
            }
            OrderEvent::StatusChanged(e) => {
                entry.status = e.to;
            }
            OrderEvent::DocumentAttached(e) => {
                *entry.document_counts.entry(e.document.body.kind()).or_insert(0) += 1;
            }
            OrderEvent::MessagePosted(e) => {
                entry.message_count += 1;
                if !e.message.is_read {
                    entry.unread.insert(e.message.id, e.message.sender);
                }
            }
            OrderEvent::MessagesRead(e) => {
                for id in &e.message_ids {
                    entry.unread.remove(id);
                }
            }
            OrderEvent::TrackingRegenerated(e) => {
                entry.checkpoints_total = e.checkpoints.len();
                entry.checkpoints_completed = e.checkpoints.iter().filter(|c| c.completed).count();
            }
        }
        entry.last_activity_at = entry.last_activity_at.max(occurred_at);

        self.store.upsert(order_id, entry);
        self.update_cursor(aggregate_id, position);
    }

    /// Drop everything and replay `envelopes` in commit order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OrderBoardError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        self.store.clear();
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        if let Ok(mut held) = self.held.lock() {
            held.clear();
        }

        envs.sort_by_key(|e| (e.aggregate_id(), e.position()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

impl<S> Projection for OrderBoardProjection<S>
where
    S: ReadStore<OrderId, OrderBoardEntry>,
{
    type Ev = OrderEvent;

    fn apply(&mut self, envelope: &EventEnvelope<OrderEvent>) {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return;
        }
        if let Err(e) = self.apply_event(
            envelope.aggregate_id(),
            envelope.position(),
            envelope.occurred_at(),
            envelope.payload().clone(),
        ) {
            warn!(
                projection = PROJECTION_NAME,
                aggregate_id = %envelope.aggregate_id(),
                error = %e,
                "order board skipped an envelope"
            );
        }
    }
}

fn follows(last: (u64, u32), position: (u64, u32)) -> bool {
    position == (last.0, last.1 + 1) || position == (last.0 + 1, 0)
}

fn event_order_id(ev: &OrderEvent) -> OrderId {
    match ev {
        OrderEvent::OrderPlaced(e) => e.order_id,
        OrderEvent::StatusChanged(e) => e.order_id,
        OrderEvent::DocumentAttached(e) => e.order_id,
        OrderEvent::MessagePosted(e) => e.order_id,
        OrderEvent::MessagesRead(e) => e.order_id,
        OrderEvent::TrackingRegenerated(e) => e.order_id,
    }
}
