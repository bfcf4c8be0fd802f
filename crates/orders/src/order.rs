use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brokerdesk_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Snapshot};
use brokerdesk_events::Event;

use crate::display::Locale;
use crate::documents::{AttachedDocument, NewDocument, OrderDocuments, RequiredDocument};
use crate::lifecycle::Transition;
use crate::messaging::{self, Message, MessageId, Sender};
use crate::notify::{self, Notice};
use crate::tracking::{self, TrackingCheckpoint};

/// Aggregate type name used on envelopes and in logs.
pub const AGGREGATE_TYPE: &str = "orders.order";

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }

    pub fn as_aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<OrderId> for AggregateId {
    fn from(value: OrderId) -> Self {
        value.0
    }
}

impl core::str::FromStr for OrderId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<AggregateId>().map(Self)
    }
}

/// Order status lifecycle (see `lifecycle` for the transition table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingReview,
    Approved,
    Rejected,
    AwaitingAdditionalDocuments,
    InProgress,
    Completed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::PendingReview,
        OrderStatus::Approved,
        OrderStatus::Rejected,
        OrderStatus::AwaitingAdditionalDocuments,
        OrderStatus::InProgress,
        OrderStatus::Completed,
    ];

    /// Stable machine tag (never shown to users; see `Label` for that).
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingReview => "pending_review",
            OrderStatus::Approved => "approved",
            OrderStatus::Rejected => "rejected",
            OrderStatus::AwaitingAdditionalDocuments => "awaiting_additional_documents",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed)
    }

    /// Statuses at or past approval, where service checkpoints are shown.
    pub fn is_post_approval(self) -> bool {
        matches!(
            self,
            OrderStatus::Approved | OrderStatus::InProgress | OrderStatus::Completed
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Services a client can book on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Import,
    Export,
    Shipping,
    Transport,
    Storage,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Import,
        ServiceKind::Export,
        ServiceKind::Shipping,
        ServiceKind::Transport,
        ServiceKind::Storage,
    ];
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) client_ref: String,
    pub(crate) status: OrderStatus,
    pub(crate) services: BTreeSet<ServiceKind>,
    pub(crate) locale: Locale,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity_at: DateTime<Utc>,
    pub(crate) rejection_reason: Option<String>,
    pub(crate) required_documents: BTreeSet<RequiredDocument>,
    pub(crate) documents: OrderDocuments,
    pub(crate) messages: Vec<Message>,
    pub(crate) tracking: Vec<TrackingCheckpoint>,
    pub(crate) version: u64,
    pub(crate) placed: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            client_ref: String::new(),
            status: OrderStatus::PendingReview,
            services: BTreeSet::new(),
            locale: Locale::default(),
            created_at: DateTime::<Utc>::default(),
            last_activity_at: DateTime::<Utc>::default(),
            rejection_reason: None,
            required_documents: BTreeSet::new(),
            documents: OrderDocuments::default(),
            messages: Vec::new(),
            tracking: Vec::new(),
            version: 0,
            placed: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn client_ref(&self) -> &str {
        &self.client_ref
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn services(&self) -> &BTreeSet<ServiceKind> {
        &self.services
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    /// Documents requested from the client; empty unless awaiting them.
    pub fn required_documents(&self) -> &BTreeSet<RequiredDocument> {
        &self.required_documents
    }

    pub fn documents(&self) -> &OrderDocuments {
        &self.documents
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tracking(&self) -> &[TrackingCheckpoint] {
        &self.tracking
    }

    pub fn is_placed(&self) -> bool {
        self.placed
    }

    /// Unread messages as seen by `viewer`, recomputed from message state.
    pub fn unread_count(&self, viewer: Sender) -> usize {
        messaging::unread_count(&self.messages, viewer)
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Snapshot for Order {
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub client_ref: String,
    pub services: BTreeSet<ServiceKind>,
    #[serde(default)]
    pub locale: Locale,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    pub order_id: OrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestAdditionalDocuments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAdditionalDocuments {
    pub order_id: OrderId,
    pub documents: BTreeSet<RequiredDocument>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reopen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reopen {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Advance (Approved -> InProgress -> Completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advance {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachDocument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachDocument {
    pub order_id: OrderId,
    pub document: NewDocument,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendMessage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub order_id: OrderId,
    pub sender: Sender,
    pub content: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeliverAutoReply (issued by the reply schedule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverAutoReply {
    pub order_id: OrderId,
    pub in_reply_to: MessageId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkAllRead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkAllRead {
    pub order_id: OrderId,
    pub viewer: Sender,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    Approve(Approve),
    Reject(Reject),
    RequestAdditionalDocuments(RequestAdditionalDocuments),
    Reopen(Reopen),
    Advance(Advance),
    AttachDocument(AttachDocument),
    SendMessage(SendMessage),
    DeliverAutoReply(DeliverAutoReply),
    MarkAllRead(MarkAllRead),
}

impl OrderCommand {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderCommand::PlaceOrder(c) => c.order_id,
            OrderCommand::Approve(c) => c.order_id,
            OrderCommand::Reject(c) => c.order_id,
            OrderCommand::RequestAdditionalDocuments(c) => c.order_id,
            OrderCommand::Reopen(c) => c.order_id,
            OrderCommand::Advance(c) => c.order_id,
            OrderCommand::AttachDocument(c) => c.order_id,
            OrderCommand::SendMessage(c) => c.order_id,
            OrderCommand::DeliverAutoReply(c) => c.order_id,
            OrderCommand::MarkAllRead(c) => c.order_id,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::PlaceOrder(_) => "place_order",
            OrderCommand::Approve(_) => "approve",
            OrderCommand::Reject(_) => "reject",
            OrderCommand::RequestAdditionalDocuments(_) => "request_additional_documents",
            OrderCommand::Reopen(_) => "reopen",
            OrderCommand::Advance(_) => "advance",
            OrderCommand::AttachDocument(_) => "attach_document",
            OrderCommand::SendMessage(_) => "send_message",
            OrderCommand::DeliverAutoReply(_) => "deliver_auto_reply",
            OrderCommand::MarkAllRead(_) => "mark_all_read",
        }
    }
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub client_ref: String,
    pub services: BTreeSet<ServiceKind>,
    pub locale: Locale,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
///
/// Carries the full post-transition reason/required-documents state, so a
/// reopen is simply a change with both cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub transition: Transition,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub rejection_reason: Option<String>,
    pub required_documents: BTreeSet<RequiredDocument>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentAttached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAttached {
    pub order_id: OrderId,
    pub document: AttachedDocument,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MessagePosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePosted {
    pub order_id: OrderId,
    pub message: Message,
}

/// Event: MessagesRead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesRead {
    pub order_id: OrderId,
    pub viewer: Sender,
    pub message_ids: Vec<MessageId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TrackingRegenerated (the timeline is replaced, never patched).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRegenerated {
    pub order_id: OrderId,
    pub checkpoints: Vec<TrackingCheckpoint>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    StatusChanged(StatusChanged),
    DocumentAttached(DocumentAttached),
    MessagePosted(MessagePosted),
    MessagesRead(MessagesRead),
    TrackingRegenerated(TrackingRegenerated),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::StatusChanged(_) => "orders.order.status_changed",
            OrderEvent::DocumentAttached(_) => "orders.document.attached",
            OrderEvent::MessagePosted(_) => "orders.message.posted",
            OrderEvent::MessagesRead(_) => "orders.message.read",
            OrderEvent::TrackingRegenerated(_) => "orders.tracking.regenerated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
            OrderEvent::DocumentAttached(e) => e.occurred_at,
            OrderEvent::MessagePosted(e) => e.message.sent_at,
            OrderEvent::MessagesRead(e) => e.occurred_at,
            OrderEvent::TrackingRegenerated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.client_ref = e.client_ref.clone();
                self.services = e.services.clone();
                self.locale = e.locale;
                self.status = OrderStatus::PendingReview;
                self.created_at = e.occurred_at;
                self.placed = true;
            }
            OrderEvent::StatusChanged(e) => {
                self.status = e.to;
                self.rejection_reason = e.rejection_reason.clone();
                self.required_documents = e.required_documents.clone();
            }
            OrderEvent::DocumentAttached(e) => {
                self.documents.push(e.document.clone());
            }
            OrderEvent::MessagePosted(e) => {
                self.messages.push(e.message.clone());
            }
            OrderEvent::MessagesRead(e) => {
                for message in &mut self.messages {
                    if e.message_ids.contains(&message.id) {
                        message.is_read = true;
                    }
                }
            }
            OrderEvent::TrackingRegenerated(e) => {
                self.tracking = e.checkpoints.clone();
            }
        }

        self.last_activity_at = event.occurred_at();
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::Approve(cmd) => {
                self.handle_plain_transition(cmd.order_id, Transition::Approve, cmd.occurred_at)
            }
            OrderCommand::Reject(cmd) => self.handle_reject(cmd),
            OrderCommand::RequestAdditionalDocuments(cmd) => self.handle_request_documents(cmd),
            OrderCommand::Reopen(cmd) => {
                self.handle_plain_transition(cmd.order_id, Transition::Reopen, cmd.occurred_at)
            }
            OrderCommand::Advance(cmd) => {
                self.handle_plain_transition(cmd.order_id, Transition::Advance, cmd.occurred_at)
            }
            OrderCommand::AttachDocument(cmd) => self.handle_attach_document(cmd),
            OrderCommand::SendMessage(cmd) => self.handle_send_message(cmd),
            OrderCommand::DeliverAutoReply(cmd) => self.handle_deliver_auto_reply(cmd),
            OrderCommand::MarkAllRead(cmd) => self.handle_mark_all_read(cmd),
        }
    }
}

impl Order {
    /// Commands other than placement require a placed order with a matching id.
    pub(crate) fn ensure_placed(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.placed {
            return Err(DomainError::not_found());
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    /// Id for the `offset`-th message appended by the current decision.
    pub(crate) fn next_message_id(&self, offset: usize) -> MessageId {
        MessageId((self.messages.len() + offset + 1) as u32)
    }

    pub(crate) fn post(
        &self,
        offset: usize,
        sender: Sender,
        content: String,
        sent_at: DateTime<Utc>,
    ) -> OrderEvent {
        OrderEvent::MessagePosted(MessagePosted {
            order_id: self.id,
            message: Message {
                id: self.next_message_id(offset),
                sender,
                content,
                sent_at,
                is_read: false,
            },
        })
    }

    /// Rebuild the tracking timeline for `status`, keeping earlier stamps.
    pub(crate) fn retrack(&self, status: OrderStatus, occurred_at: DateTime<Utc>) -> OrderEvent {
        let checkpoints = tracking::stamp(
            tracking::project(status, &self.services),
            &self.tracking,
            self.created_at,
            occurred_at,
        );
        OrderEvent::TrackingRegenerated(TrackingRegenerated {
            order_id: self.id,
            checkpoints,
            occurred_at,
        })
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.placed {
            return Err(DomainError::already_exists("order already exists"));
        }
        if cmd.client_ref.trim().is_empty() {
            return Err(DomainError::invalid_argument("client_ref is required"));
        }
        if cmd.services.is_empty() {
            return Err(DomainError::invalid_argument(
                "at least one service must be selected",
            ));
        }

        let placed = OrderPlaced {
            order_id: cmd.order_id,
            client_ref: cmd.client_ref.trim().to_string(),
            services: cmd.services.clone(),
            locale: cmd.locale,
            occurred_at: cmd.occurred_at,
        };

        let checkpoints = tracking::stamp(
            tracking::project(OrderStatus::PendingReview, &cmd.services),
            &[],
            cmd.occurred_at,
            cmd.occurred_at,
        );

        Ok(vec![
            OrderEvent::OrderPlaced(placed),
            OrderEvent::MessagePosted(MessagePosted {
                order_id: cmd.order_id,
                message: Message {
                    id: MessageId(1),
                    sender: Sender::System,
                    content: notify::compose(&Notice::OrderReceived, cmd.locale),
                    sent_at: cmd.occurred_at,
                    is_read: false,
                },
            }),
            OrderEvent::TrackingRegenerated(TrackingRegenerated {
                order_id: cmd.order_id,
                checkpoints,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }
}
