//! Order record persistence boundary.
//!
//! One snapshot per aggregate id, replaced wholesale on every save and
//! guarded by an optimistic version check. No storage assumptions beyond
//! that contract.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryRecordStore;
pub use r#trait::{RecordStore, StoreError};
