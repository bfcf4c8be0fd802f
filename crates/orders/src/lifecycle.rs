//! Order status state machine.
//!
//! The transition table is closed: every `(status, transition)` pair not
//! listed in [`Transition::target`] is illegal and leaves the order
//! untouched. A successful transition always commits three events together:
//! the status change, one system message describing it, and the regenerated
//! tracking timeline.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerdesk_core::DomainError;

use crate::documents::RequiredDocument;
use crate::messaging::Sender;
use crate::notify::{self, Notice};
use crate::order::{
    Order, OrderEvent, OrderId, OrderStatus, Reject, RequestAdditionalDocuments, StatusChanged,
};

/// Lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Approve,
    Reject,
    RequestAdditionalDocuments,
    Reopen,
    Advance,
}

impl Transition {
    pub const ALL: [Transition; 5] = [
        Transition::Approve,
        Transition::Reject,
        Transition::RequestAdditionalDocuments,
        Transition::Reopen,
        Transition::Advance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::RequestAdditionalDocuments => "request_additional_documents",
            Transition::Reopen => "reopen",
            Transition::Advance => "advance",
        }
    }

    /// Target status of this operation from `from`, or `None` if illegal.
    pub fn target(self, from: OrderStatus) -> Option<OrderStatus> {
        match (from, self) {
            (OrderStatus::PendingReview, Transition::Approve) => Some(OrderStatus::Approved),
            (OrderStatus::PendingReview, Transition::Reject) => Some(OrderStatus::Rejected),
            (OrderStatus::PendingReview, Transition::RequestAdditionalDocuments) => {
                Some(OrderStatus::AwaitingAdditionalDocuments)
            }
            (OrderStatus::Rejected, Transition::Reopen)
            | (OrderStatus::AwaitingAdditionalDocuments, Transition::Reopen) => {
                Some(OrderStatus::PendingReview)
            }
            (OrderStatus::Approved, Transition::Advance) => Some(OrderStatus::InProgress),
            (OrderStatus::InProgress, Transition::Advance) => Some(OrderStatus::Completed),
            _ => None,
        }
    }

    /// Transitions legal from `from`.
    pub fn available_from(from: OrderStatus) -> Vec<Transition> {
        Transition::ALL
            .into_iter()
            .filter(|t| t.target(from).is_some())
            .collect()
    }
}

impl Order {
    pub(crate) fn handle_reject(&self, cmd: &Reject) -> Result<Vec<OrderEvent>, DomainError> {
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::invalid_argument("rejection reason is required"));
        }
        self.handle_transition(
            cmd.order_id,
            Transition::Reject,
            Some(reason.to_string()),
            BTreeSet::new(),
            cmd.occurred_at,
        )
    }

    pub(crate) fn handle_request_documents(
        &self,
        cmd: &RequestAdditionalDocuments,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if cmd.documents.is_empty() {
            return Err(DomainError::invalid_argument(
                "at least one additional document must be requested",
            ));
        }
        self.handle_transition(
            cmd.order_id,
            Transition::RequestAdditionalDocuments,
            None,
            cmd.documents.clone(),
            cmd.occurred_at,
        )
    }

    /// A transition that carries no reason and requests no documents.
    pub(crate) fn handle_plain_transition(
        &self,
        order_id: OrderId,
        transition: Transition,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.handle_transition(order_id, transition, None, BTreeSet::new(), occurred_at)
    }

    /// Decide a status transition and its side effects.
    ///
    /// `rejection_reason` and `required_documents` are the values the order
    /// holds after the transition; a reopen passes neither, clearing both.
    pub(crate) fn handle_transition(
        &self,
        order_id: OrderId,
        transition: Transition,
        rejection_reason: Option<String>,
        required_documents: BTreeSet<RequiredDocument>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(order_id)?;

        let from = self.status;
        let to = transition.target(from).ok_or_else(|| {
            let allowed: Vec<&str> = Transition::available_from(from)
                .into_iter()
                .map(Transition::name)
                .collect();
            DomainError::illegal_transition(format!(
                "cannot {} an order in status {} (allowed: {})",
                transition.name(),
                from,
                if allowed.is_empty() { "none".to_string() } else { allowed.join(", ") }
            ))
        })?;

        let notice = Notice::StatusChanged {
            to,
            reason: rejection_reason.as_deref(),
            documents: &required_documents,
        };
        let content = notify::compose(&notice, self.locale);

        Ok(vec![
            OrderEvent::StatusChanged(StatusChanged {
                order_id,
                transition,
                from,
                to,
                rejection_reason: rejection_reason.clone(),
                required_documents: required_documents.clone(),
                occurred_at,
            }),
            self.post(0, Sender::System, content, occurred_at),
            self.retrack(to, occurred_at),
        ])
    }
}
