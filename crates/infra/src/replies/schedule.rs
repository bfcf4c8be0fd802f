//! Scheduled auto-reply entries and their storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use brokerdesk_orders::{MessageId, OrderId};

/// Unique scheduled-reply identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyId(pub Uuid);

impl ReplyId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ReplyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReplyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a scheduled reply.
///
/// `Pending → Firing → Delivered`, or `Pending → Cancelled`. A firing entry
/// that hit a transient error goes back to `Pending` with a later due time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ReplyStatus {
    Pending,
    Firing,
    Delivered,
    Cancelled,
    Failed { error: String },
}

impl ReplyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplyStatus::Delivered | ReplyStatus::Cancelled | ReplyStatus::Failed { .. }
        )
    }
}

/// A one-shot auto-reply tied to a client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledReply {
    pub id: ReplyId,
    pub order_id: OrderId,
    pub in_reply_to: MessageId,
    pub due_at: DateTime<Utc>,
    pub status: ReplyStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledReply {
    pub fn new(order_id: OrderId, in_reply_to: MessageId, due_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: ReplyId::new(),
            order_id,
            in_reply_to,
            due_at,
            status: ReplyStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReplyStatus::Pending && self.due_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("scheduled reply not found: {0}")]
    NotFound(ReplyId),
    #[error("scheduled reply already exists: {0}")]
    AlreadyExists(ReplyId),
    #[error("scheduled reply {id} is {status:?}, expected {expected}")]
    InvalidState {
        id: ReplyId,
        status: ReplyStatus,
        expected: &'static str,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage for scheduled replies.
///
/// `claim_due` is the only way an entry becomes `Firing`, and it flips
/// every returned entry atomically, so two workers never deliver the same
/// reply.
pub trait ReplySchedule: Send + Sync {
    fn schedule(&self, reply: ScheduledReply) -> Result<ReplyId, ScheduleError>;

    fn get(&self, id: ReplyId) -> Result<Option<ScheduledReply>, ScheduleError>;

    /// Claim up to `limit` pending entries due at `now`, oldest first.
    fn claim_due(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<ScheduledReply>, ScheduleError>;

    /// Move a firing entry to a terminal status.
    fn finish(&self, id: ReplyId, status: ReplyStatus) -> Result<(), ScheduleError>;

    /// Put a firing entry back to `Pending`, due again at `retry_at`.
    fn release(&self, id: ReplyId, retry_at: DateTime<Utc>) -> Result<(), ScheduleError>;

    /// Cancel every pending entry of an order. Returns how many were cancelled.
    fn cancel_for_order(&self, order_id: OrderId) -> Result<usize, ScheduleError>;

    fn list_for_order(&self, order_id: OrderId) -> Result<Vec<ScheduledReply>, ScheduleError>;
}

impl<T> ReplySchedule for Arc<T>
where
    T: ReplySchedule + ?Sized,
{
    fn schedule(&self, reply: ScheduledReply) -> Result<ReplyId, ScheduleError> {
        (**self).schedule(reply)
    }

    fn get(&self, id: ReplyId) -> Result<Option<ScheduledReply>, ScheduleError> {
        (**self).get(id)
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledReply>, ScheduleError> {
        (**self).claim_due(now, limit)
    }

    fn finish(&self, id: ReplyId, status: ReplyStatus) -> Result<(), ScheduleError> {
        (**self).finish(id, status)
    }

    fn release(&self, id: ReplyId, retry_at: DateTime<Utc>) -> Result<(), ScheduleError> {
        (**self).release(id, retry_at)
    }

    fn cancel_for_order(&self, order_id: OrderId) -> Result<usize, ScheduleError> {
        (**self).cancel_for_order(order_id)
    }

    fn list_for_order(&self, order_id: OrderId) -> Result<Vec<ScheduledReply>, ScheduleError> {
        (**self).list_for_order(order_id)
    }
}

/// In-memory reply schedule for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReplySchedule {
    replies: RwLock<HashMap<ReplyId, ScheduledReply>>,
}

impl InMemoryReplySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> ScheduleError {
        ScheduleError::Storage("reply schedule lock poisoned".to_string())
    }

    fn transition(
        &self,
        id: ReplyId,
        expected: &'static str,
        allowed: impl FnOnce(&ReplyStatus) -> bool,
        update: impl FnOnce(&mut ScheduledReply),
    ) -> Result<(), ScheduleError> {
        let mut replies = self.replies.write().map_err(|_| Self::poisoned())?;
        let reply = replies.get_mut(&id).ok_or(ScheduleError::NotFound(id))?;
        if !allowed(&reply.status) {
            return Err(ScheduleError::InvalidState {
                id,
                status: reply.status.clone(),
                expected,
            });
        }
        update(reply);
        reply.updated_at = Utc::now();
        Ok(())
    }
}

impl ReplySchedule for InMemoryReplySchedule {
    fn schedule(&self, reply: ScheduledReply) -> Result<ReplyId, ScheduleError> {
        let mut replies = self.replies.write().map_err(|_| Self::poisoned())?;
        if replies.contains_key(&reply.id) {
            return Err(ScheduleError::AlreadyExists(reply.id));
        }
        let id = reply.id;
        debug!(
            reply_id = %id,
            order_id = %reply.order_id,
            due_at = %reply.due_at,
            "auto-reply scheduled"
        );
        replies.insert(id, reply);
        Ok(id)
    }

    fn get(&self, id: ReplyId) -> Result<Option<ScheduledReply>, ScheduleError> {
        let replies = self.replies.read().map_err(|_| Self::poisoned())?;
        Ok(replies.get(&id).cloned())
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledReply>, ScheduleError> {
        let mut replies = self.replies.write().map_err(|_| Self::poisoned())?;

        let mut due: Vec<ReplyId> = replies
            .values()
            .filter(|r| r.is_due(now))
            .map(|r| r.id)
            .collect();
        // UUIDv7 ids sort by creation time; due_at decides first.
        due.sort_by_key(|id| (replies[id].due_at, *id));
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(reply) = replies.get_mut(&id) {
                reply.status = ReplyStatus::Firing;
                reply.attempts += 1;
                reply.updated_at = now;
                claimed.push(reply.clone());
            }
        }
        Ok(claimed)
    }

    fn finish(&self, id: ReplyId, status: ReplyStatus) -> Result<(), ScheduleError> {
        if !status.is_terminal() {
            return Err(ScheduleError::InvalidState {
                id,
                status,
                expected: "a terminal status",
            });
        }
        self.transition(
            id,
            "firing",
            |s| *s == ReplyStatus::Firing,
            |r| r.status = status,
        )
    }

    fn release(&self, id: ReplyId, retry_at: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.transition(
            id,
            "firing",
            |s| *s == ReplyStatus::Firing,
            |r| {
                r.status = ReplyStatus::Pending;
                r.due_at = retry_at;
            },
        )
    }

    fn cancel_for_order(&self, order_id: OrderId) -> Result<usize, ScheduleError> {
        let mut replies = self.replies.write().map_err(|_| Self::poisoned())?;
        let now = Utc::now();
        let mut cancelled = 0;
        for reply in replies.values_mut() {
            if reply.order_id == order_id && reply.status == ReplyStatus::Pending {
                reply.status = ReplyStatus::Cancelled;
                reply.updated_at = now;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    fn list_for_order(&self, order_id: OrderId) -> Result<Vec<ScheduledReply>, ScheduleError> {
        let replies = self.replies.read().map_err(|_| Self::poisoned())?;
        let mut out: Vec<_> = replies
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.created_at, r.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reply_due_in(order_id: OrderId, secs: i64) -> ScheduledReply {
        ScheduledReply::new(order_id, MessageId(2), Utc::now() + Duration::seconds(secs))
    }

    #[test]
    fn only_due_pending_entries_are_claimed() {
        let schedule = InMemoryReplySchedule::new();
        let order_id = OrderId::generate();
        let due = schedule.schedule(reply_due_in(order_id, -1)).unwrap();
        let later = schedule.schedule(reply_due_in(order_id, 60)).unwrap();

        let claimed = schedule.claim_due(Utc::now(), 10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due);
        assert_eq!(claimed[0].status, ReplyStatus::Firing);
        assert_eq!(claimed[0].attempts, 1);

        assert_eq!(schedule.get(later).unwrap().unwrap().status, ReplyStatus::Pending);
    }

    #[test]
    fn a_claimed_entry_is_not_claimed_twice() {
        let schedule = InMemoryReplySchedule::new();
        schedule.schedule(reply_due_in(OrderId::generate(), -1)).unwrap();

        assert_eq!(schedule.claim_due(Utc::now(), 10).unwrap().len(), 1);
        assert!(schedule.claim_due(Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn claim_respects_limit_and_due_order() {
        let schedule = InMemoryReplySchedule::new();
        let order_id = OrderId::generate();
        let second = schedule.schedule(reply_due_in(order_id, -5)).unwrap();
        let first = schedule.schedule(reply_due_in(order_id, -10)).unwrap();
        schedule.schedule(reply_due_in(order_id, -1)).unwrap();

        let claimed = schedule.claim_due(Utc::now(), 2).unwrap();
        let ids: Vec<_> = claimed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn cancel_for_order_only_touches_pending_entries_of_that_order() {
        let schedule = InMemoryReplySchedule::new();
        let order_id = OrderId::generate();
        let other = OrderId::generate();

        let firing = schedule.schedule(reply_due_in(order_id, -1)).unwrap();
        schedule.claim_due(Utc::now(), 1).unwrap();
        let pending = schedule.schedule(reply_due_in(order_id, 60)).unwrap();
        let untouched = schedule.schedule(reply_due_in(other, 60)).unwrap();

        assert_eq!(schedule.cancel_for_order(order_id).unwrap(), 1);
        assert_eq!(schedule.get(pending).unwrap().unwrap().status, ReplyStatus::Cancelled);
        assert_eq!(schedule.get(firing).unwrap().unwrap().status, ReplyStatus::Firing);
        assert_eq!(schedule.get(untouched).unwrap().unwrap().status, ReplyStatus::Pending);
    }

    #[test]
    fn finish_and_release_require_a_firing_entry() {
        let schedule = InMemoryReplySchedule::new();
        let id = schedule.schedule(reply_due_in(OrderId::generate(), -1)).unwrap();

        let err = schedule.finish(id, ReplyStatus::Delivered).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidState { .. }));

        schedule.claim_due(Utc::now(), 1).unwrap();
        let retry_at = Utc::now() + Duration::seconds(30);
        schedule.release(id, retry_at).unwrap();
        let released = schedule.get(id).unwrap().unwrap();
        assert_eq!(released.status, ReplyStatus::Pending);
        assert_eq!(released.due_at, retry_at);

        schedule.claim_due(retry_at, 1).unwrap();
        schedule.finish(id, ReplyStatus::Delivered).unwrap();
        let done = schedule.get(id).unwrap().unwrap();
        assert_eq!(done.status, ReplyStatus::Delivered);
        assert_eq!(done.attempts, 2);
    }

    #[test]
    fn finish_rejects_non_terminal_status() {
        let schedule = InMemoryReplySchedule::new();
        let id = schedule.schedule(reply_due_in(OrderId::generate(), -1)).unwrap();
        schedule.claim_due(Utc::now(), 1).unwrap();

        assert!(schedule.finish(id, ReplyStatus::Pending).is_err());
    }
}
