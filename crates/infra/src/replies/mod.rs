//! Deferred auto-replies to client messages.
//!
//! A client message schedules one reply entry; the worker claims due
//! entries and delivers them through the workflow as a regular command, so
//! the reply goes through the same versioned save as everything else.
//! Completing an order cancels its pending entries.

pub mod schedule;
pub mod worker;

pub use schedule::{
    InMemoryReplySchedule, ReplyId, ReplySchedule, ReplyStatus, ScheduleError, ScheduledReply,
};
pub use worker::{
    DeliverDue, DeliveryReport, ReplyWorker, ReplyWorkerConfig, ReplyWorkerHandle,
    ReplyWorkerStats,
};
