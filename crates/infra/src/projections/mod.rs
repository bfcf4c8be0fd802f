//! Projection implementations (read model builders).
//!
//! Projections consume committed order events from the bus and build
//! query-friendly views. All projections are:
//! - **Rebuildable**: can be reconstructed by replaying envelopes
//! - **Idempotent**: safe for at-least-once delivery

pub mod order_board;

pub use order_board::{OrderBoardEntry, OrderBoardError, OrderBoardProjection};
