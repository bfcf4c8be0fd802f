//! Per-order conversation: append-only messages with read bookkeeping.

use serde::{Deserialize, Serialize};

use brokerdesk_core::DomainError;

use crate::notify::{self, Notice};
use crate::order::{
    DeliverAutoReply, MarkAllRead, MessagesRead, Order, OrderEvent, OrderStatus, SendMessage,
};

/// Message identifier, a per-order sequence number starting at 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u32);

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

/// Who wrote a message; also used as the viewer role for read state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    System,
    Staff,
    Client,
}

impl core::str::FromStr for Sender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Sender::System),
            "staff" => Ok(Sender::Staff),
            "client" => Ok(Sender::Client),
            other => Err(DomainError::invalid_argument(format!("unknown sender: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub is_read: bool,
}

impl Message {
    /// Whether `viewer` still has this message to read.
    pub fn is_unread_for(&self, viewer: Sender) -> bool {
        !self.is_read && self.sender != viewer
    }
}

/// Unread messages for `viewer`: not yet read and written by someone else.
pub fn unread_count(messages: &[Message], viewer: Sender) -> usize {
    messages.iter().filter(|m| m.is_unread_for(viewer)).count()
}

impl Order {
    pub(crate) fn handle_send_message(
        &self,
        cmd: &SendMessage,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;

        let content = cmd.content.trim();
        if content.is_empty() {
            return Err(DomainError::invalid_argument("message content is required"));
        }

        Ok(vec![self.post(0, cmd.sender, content.to_string(), cmd.occurred_at)])
    }

    /// Deliver the scheduled auto-reply to a client message.
    ///
    /// Returns no events once the order is completed, so a reply that lost
    /// the race with completion is dropped rather than posted.
    pub(crate) fn handle_deliver_auto_reply(
        &self,
        cmd: &DeliverAutoReply,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;

        match self.message(cmd.in_reply_to) {
            Some(message) if message.sender == Sender::Client => {}
            Some(_) => {
                return Err(DomainError::invariant(format!(
                    "auto-reply target {} is not a client message",
                    cmd.in_reply_to
                )));
            }
            None => {
                return Err(DomainError::invariant(format!(
                    "auto-reply target {} does not exist",
                    cmd.in_reply_to
                )));
            }
        }

        if self.status == OrderStatus::Completed {
            return Ok(Vec::new());
        }

        let content = notify::compose(&Notice::AutoReply, self.locale);
        Ok(vec![self.post(0, Sender::Staff, content, cmd.occurred_at)])
    }

    pub(crate) fn handle_mark_all_read(
        &self,
        cmd: &MarkAllRead,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;

        let message_ids: Vec<_> = self
            .messages
            .iter()
            .filter(|m| m.is_unread_for(cmd.viewer))
            .map(|m| m.id)
            .collect();

        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![OrderEvent::MessagesRead(MessagesRead {
            order_id: cmd.order_id,
            viewer: cmd.viewer,
            message_ids,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::Locale;
    use crate::order::{Advance, Approve, OrderCommand, OrderId, PlaceOrder, ServiceKind};
    use brokerdesk_core::{Aggregate, AggregateId};
    use brokerdesk_events::execute;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap()
    }

    fn placed() -> Order {
        let id = OrderId::new(AggregateId::new());
        let mut order = Order::empty(id);
        execute(
            &mut order,
            &OrderCommand::PlaceOrder(PlaceOrder {
                order_id: id,
                client_ref: "ACME Trading".to_string(),
                services: [ServiceKind::Shipping].into_iter().collect(),
                locale: Locale::En,
                occurred_at: t(0),
            }),
        )
        .unwrap();
        order
    }

    fn send(order: &mut Order, sender: Sender, content: &str, minute: u32) -> MessageId {
        let cmd = OrderCommand::SendMessage(SendMessage {
            order_id: order.id_typed(),
            sender,
            content: content.to_string(),
            occurred_at: t(minute),
        });
        execute(order, &cmd).unwrap();
        order.messages().last().unwrap().id
    }

    fn mark_all_read(order: &mut Order, viewer: Sender) -> usize {
        let cmd = OrderCommand::MarkAllRead(MarkAllRead {
            order_id: order.id_typed(),
            viewer,
            occurred_at: t(30),
        });
        execute(order, &cmd).unwrap().len()
    }

    #[test]
    fn client_message_is_unread_for_staff_and_not_for_client() {
        let mut order = placed();
        let staff_before = order.unread_count(Sender::Staff);

        let id = send(&mut order, Sender::Client, "hello", 1);
        let message = order.message(id).unwrap();
        assert_eq!(message.sender, Sender::Client);
        assert!(!message.is_read);
        assert_eq!(message.content, "hello");
        assert_eq!(order.unread_count(Sender::Staff), staff_before + 1);

        mark_all_read(&mut order, Sender::Staff);
        assert_eq!(order.unread_count(Sender::Staff), 0);
    }

    #[test]
    fn empty_content_is_invalid_argument() {
        let order = placed();
        let result = order.handle(&OrderCommand::SendMessage(SendMessage {
            order_id: order.id_typed(),
            sender: Sender::Client,
            content: "  ".to_string(),
            occurred_at: t(1),
        }));
        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[test]
    fn message_ids_are_sequential() {
        let mut order = placed();
        let a = send(&mut order, Sender::Client, "one", 1);
        let b = send(&mut order, Sender::Staff, "two", 2);
        assert_eq!(a, MessageId(2));
        assert_eq!(b, MessageId(3));
    }

    #[test]
    fn mark_all_read_for_client_leaves_client_messages_alone() {
        let mut order = placed();
        send(&mut order, Sender::Client, "question", 1);
        send(&mut order, Sender::Staff, "answer", 2);
        assert_eq!(order.unread_count(Sender::Client), 2);

        mark_all_read(&mut order, Sender::Client);
        assert_eq!(order.unread_count(Sender::Client), 0);
        // Read state is shared: only the client's own message is left for staff.
        assert_eq!(order.unread_count(Sender::Staff), 1);
    }

    #[test]
    fn mark_all_read_with_nothing_unread_emits_no_events() {
        let mut order = placed();
        mark_all_read(&mut order, Sender::Client);
        assert_eq!(mark_all_read(&mut order, Sender::Client), 0);
    }

    #[test]
    fn auto_reply_is_posted_by_staff() {
        let mut order = placed();
        let question = send(&mut order, Sender::Client, "where is my box?", 1);

        let cmd = OrderCommand::DeliverAutoReply(DeliverAutoReply {
            order_id: order.id_typed(),
            in_reply_to: question,
            occurred_at: t(3),
        });
        execute(&mut order, &cmd).unwrap();

        let reply = order.messages().last().unwrap();
        assert_eq!(reply.sender, Sender::Staff);
        assert!(reply.content.starts_with("Thank you for contacting us."));
        assert_eq!(reply.sent_at, t(3));
    }

    #[test]
    fn auto_reply_on_completed_order_is_a_no_op() {
        let mut order = placed();
        let question = send(&mut order, Sender::Client, "status?", 1);
        for (minute, cmd) in [
            (2, OrderCommand::Approve(Approve { order_id: order.id_typed(), occurred_at: t(2) })),
            (3, OrderCommand::Advance(Advance { order_id: order.id_typed(), occurred_at: t(3) })),
            (4, OrderCommand::Advance(Advance { order_id: order.id_typed(), occurred_at: t(4) })),
        ] {
            execute(&mut order, &cmd).unwrap_or_else(|e| panic!("step {minute}: {e}"));
        }
        assert_eq!(order.status(), OrderStatus::Completed);

        let events = order
            .handle(&OrderCommand::DeliverAutoReply(DeliverAutoReply {
                order_id: order.id_typed(),
                in_reply_to: question,
                occurred_at: t(5),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn auto_reply_must_target_a_client_message() {
        let order = placed();
        let result = order.handle(&OrderCommand::DeliverAutoReply(DeliverAutoReply {
            order_id: order.id_typed(),
            in_reply_to: MessageId(1),
            occurred_at: t(3),
        }));
        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn sender_parses_known_roles_only() {
        assert_eq!("staff".parse::<Sender>(), Ok(Sender::Staff));
        assert!("admin".parse::<Sender>().is_err());
    }
}
