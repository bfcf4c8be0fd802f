//! Client-visible shipment tracking timeline.
//!
//! [`project`] is a pure function of `(status, services)`: it decides which
//! checkpoints exist and which are completed, and yields them unstamped.
//! [`stamp`] then fills in reach times from the order's history so that a
//! checkpoint keeps the time it was first completed across regenerations.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{OrderStatus, ServiceKind};

/// Kinds of tracking checkpoints, in timeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Received,
    ApprovedForProcessing,
    ShipmentPackaging,
    CustomsClearance,
    TransportPreparation,
    FinalCompletion,
}

impl CheckpointKind {
    /// Stable identifier of the checkpoint within an order's timeline.
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointKind::Received => "received",
            CheckpointKind::ApprovedForProcessing => "approved_for_processing",
            CheckpointKind::ShipmentPackaging => "shipment_packaging",
            CheckpointKind::CustomsClearance => "customs_clearance",
            CheckpointKind::TransportPreparation => "transport_preparation",
            CheckpointKind::FinalCompletion => "final_completion",
        }
    }

    /// Whether this checkpoint tracks work for a booked service.
    pub fn is_service(self) -> bool {
        matches!(
            self,
            CheckpointKind::ShipmentPackaging
                | CheckpointKind::CustomsClearance
                | CheckpointKind::TransportPreparation
        )
    }
}

/// One step of the tracking timeline.
///
/// `reached_at` is `None` for placeholders (not yet completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingCheckpoint {
    pub kind: CheckpointKind,
    pub completed: bool,
    pub reached_at: Option<DateTime<Utc>>,
}

impl TrackingCheckpoint {
    fn pending(kind: CheckpointKind) -> Self {
        Self {
            kind,
            completed: false,
            reached_at: None,
        }
    }

    fn done(kind: CheckpointKind) -> Self {
        Self {
            kind,
            completed: true,
            reached_at: None,
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Checkpoints for `(status, services)`, unstamped.
///
/// Always starts with a completed `Received`. From approval on, adds a
/// completed `ApprovedForProcessing` followed by one checkpoint per
/// tracked service: shipping, then customs (import and export share one),
/// then transport. Storage has no checkpoint. Ends with `FinalCompletion`,
/// which (like the service checkpoints) is completed only once the order is
/// `Completed`.
pub fn project(status: OrderStatus, services: &BTreeSet<ServiceKind>) -> Vec<TrackingCheckpoint> {
    let finished = status == OrderStatus::Completed;
    let step = |kind| {
        if finished {
            TrackingCheckpoint::done(kind)
        } else {
            TrackingCheckpoint::pending(kind)
        }
    };

    let mut checkpoints = vec![TrackingCheckpoint::done(CheckpointKind::Received)];

    if status.is_post_approval() {
        checkpoints.push(TrackingCheckpoint::done(CheckpointKind::ApprovedForProcessing));

        if services.contains(&ServiceKind::Shipping) {
            checkpoints.push(step(CheckpointKind::ShipmentPackaging));
        }
        if services.contains(&ServiceKind::Import) || services.contains(&ServiceKind::Export) {
            checkpoints.push(step(CheckpointKind::CustomsClearance));
        }
        if services.contains(&ServiceKind::Transport) {
            checkpoints.push(step(CheckpointKind::TransportPreparation));
        }
    }

    checkpoints.push(step(CheckpointKind::FinalCompletion));
    checkpoints
}

/// Fill in reach times for completed checkpoints.
///
/// `Received` takes `received_at`. Any other completed checkpoint keeps the
/// time it had in `previous` if it was already completed there, otherwise
/// takes `now`. Placeholders stay unstamped.
pub fn stamp(
    mut checkpoints: Vec<TrackingCheckpoint>,
    previous: &[TrackingCheckpoint],
    received_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<TrackingCheckpoint> {
    for checkpoint in &mut checkpoints {
        if !checkpoint.completed {
            checkpoint.reached_at = None;
            continue;
        }
        checkpoint.reached_at = Some(if checkpoint.kind == CheckpointKind::Received {
            received_at
        } else {
            previous
                .iter()
                .find(|p| p.kind == checkpoint.kind && p.completed)
                .and_then(|p| p.reached_at)
                .unwrap_or(now)
        });
    }
    checkpoints
}
