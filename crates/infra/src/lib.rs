//! Infrastructure layer: record storage, command dispatch, the order
//! workflow surface, auto-reply scheduling, read models and configuration.

pub mod command_dispatcher;
pub mod config;
pub mod projections;
pub mod read_model;
pub mod record_store;
pub mod replies;
pub mod retry;
pub mod workers;
pub mod workflow;

mod integration_tests;
#[cfg(test)]
mod test_support;

pub use command_dispatcher::{CommandDispatcher, Committed, DispatchError};
pub use config::{ConfigError, WorkflowConfig};
pub use record_store::{InMemoryRecordStore, RecordStore, StoreError};
pub use replies::{InMemoryReplySchedule, ReplySchedule, ReplyWorker, ReplyWorkerConfig};
pub use retry::{retry_on_conflict, RetryPolicy};
pub use workflow::OrderWorkflow;
