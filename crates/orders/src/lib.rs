//! Order workflow domain module.
//!
//! Business rules for customs-brokerage orders: the status lifecycle, the
//! sub-documents attached to an order, the per-order conversation, and the
//! tracking timeline derived from status and services. Implemented purely
//! as deterministic domain logic (no IO, no clocks, no storage).

pub mod display;
pub mod documents;
pub mod lifecycle;
pub mod messaging;
pub mod notify;
pub mod order;
pub mod tracking;

pub use display::{Label, Locale};
pub use documents::{
    Attached, AttachedDocument, Attachment, CustomsDeclaration, DocumentBody, DocumentDraft,
    DocumentId, DocumentKind, InvoiceLine, NewDocument, OrderDocuments, PaymentStatus, Place,
    Policy, PurchaseInvoice, PurchaseInvoiceDraft, RequiredDocument, TaxSlip, TransportLeg,
    WeightUnit,
};
pub use lifecycle::Transition;
pub use messaging::{Message, MessageId, Sender};
pub use notify::Notice;
pub use order::{
    Advance, Approve, AttachDocument, DeliverAutoReply, DocumentAttached, MarkAllRead,
    MessagePosted, MessagesRead, Order, OrderCommand, OrderEvent, OrderId, OrderPlaced,
    OrderStatus, PlaceOrder, Reject, Reopen, RequestAdditionalDocuments, SendMessage,
    ServiceKind, StatusChanged, TrackingRegenerated, AGGREGATE_TYPE,
};
pub use tracking::{CheckpointKind, TrackingCheckpoint};
