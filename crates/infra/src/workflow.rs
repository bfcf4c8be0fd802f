//! Order workflow command surface.
//!
//! One method per operation a caller (UI, CLI, worker) can invoke. Each
//! call loads the order, decides, saves with a version check, publishes,
//! and returns the new snapshot. Side effects that live outside the order
//! record (scheduling or cancelling auto-replies) run after the save and
//! before publication, so a bus failure cannot skip them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use brokerdesk_core::AggregateRoot;
use brokerdesk_events::{EventBus, EventEnvelope};
use brokerdesk_orders::{
    Advance, Approve, AttachDocument, Attachment, CustomsDeclaration, DeliverAutoReply,
    DocumentDraft, MarkAllRead, NewDocument, Order, OrderCommand, OrderEvent, OrderId,
    OrderStatus, PlaceOrder, Policy, PurchaseInvoiceDraft, Reject, Reopen,
    RequestAdditionalDocuments, RequiredDocument, SendMessage, Sender, ServiceKind, TaxSlip,
    TransportLeg, AGGREGATE_TYPE,
};

use crate::command_dispatcher::{CommandDispatcher, Committed, DispatchError};
use crate::config::WorkflowConfig;
use crate::record_store::RecordStore;
use crate::replies::{DeliverDue, DeliveryReport, ReplySchedule, ReplyStatus, ScheduledReply};

/// Maximum entries claimed by one delivery pass.
pub const DELIVERY_BATCH: usize = 64;

pub type OrderResult = Result<Order, DispatchError>;

/// The order workflow over a record store, an event bus and a reply schedule.
#[derive(Debug)]
pub struct OrderWorkflow<S, B, R> {
    dispatcher: CommandDispatcher<S, B>,
    replies: R,
    config: WorkflowConfig,
}

impl<S, B, R> OrderWorkflow<S, B, R> {
    pub fn new(store: S, bus: B, replies: R, config: WorkflowConfig) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            replies,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn replies(&self) -> &R {
        &self.replies
    }
}

impl<S, B, R> OrderWorkflow<S, B, R>
where
    S: RecordStore<Order>,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: ReplySchedule,
{
    /// Dispatch any order command and run its post-commit effects.
    pub fn handle(
        &self,
        command: &OrderCommand,
    ) -> Result<Committed<Order, OrderEvent>, DispatchError> {
        let order_id = command.order_id();
        let committed = self
            .dispatcher
            .dispatch_with(
                AGGREGATE_TYPE,
                &order_id,
                command,
                |id| Order::empty(*id),
                |committed| {
                    info!(
                        order_id = %order_id,
                        command = command.name(),
                        version = committed.snapshot.version(),
                        status = %committed.snapshot.status(),
                        "order command committed"
                    );
                    self.after_commit(order_id, committed)
                },
            )
            .inspect_err(|e| {
                debug!(
                    order_id = %order_id,
                    command = command.name(),
                    error = %e,
                    "order command failed"
                );
            })?;

        if committed.is_noop() {
            debug!(
                order_id = %order_id,
                command = command.name(),
                "order command changed nothing"
            );
        }
        Ok(committed)
    }

    fn after_commit(
        &self,
        order_id: OrderId,
        committed: &Committed<Order, OrderEvent>,
    ) -> Result<(), DispatchError> {
        for envelope in &committed.events {
            match envelope.payload() {
                OrderEvent::MessagePosted(posted) if posted.message.sender == Sender::Client => {
                    if committed.snapshot.status() == OrderStatus::Completed {
                        debug!(order_id = %order_id, "order completed, no auto-reply scheduled");
                        continue;
                    }
                    let due_at = posted.message.sent_at + self.config.auto_reply_delay_chrono();
                    let reply = ScheduledReply::new(order_id, posted.message.id, due_at);
                    let reply_id = self.replies.schedule(reply)?;
                    debug!(
                        order_id = %order_id,
                        reply_id = %reply_id,
                        %due_at,
                        "auto-reply scheduled"
                    );
                }
                OrderEvent::StatusChanged(changed) if changed.to == OrderStatus::Completed => {
                    let cancelled = self.replies.cancel_for_order(order_id)?;
                    if cancelled > 0 {
                        info!(order_id = %order_id, cancelled, "pending auto-replies cancelled");
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn run(&self, command: OrderCommand) -> OrderResult {
        Ok(self.handle(&command)?.into_snapshot())
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn get(&self, order_id: OrderId) -> OrderResult {
        self.dispatcher.load(&order_id)
    }

    /// Unread messages for `viewer`, recomputed from the stored messages.
    pub fn unread_count(&self, order_id: OrderId, viewer: Sender) -> Result<usize, DispatchError> {
        Ok(self.get(order_id)?.unread_count(viewer))
    }

    pub fn place_order(
        &self,
        order_id: OrderId,
        client_ref: impl Into<String>,
        services: BTreeSet<ServiceKind>,
    ) -> OrderResult {
        self.run(OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            client_ref: client_ref.into(),
            services,
            locale: self.config.locale,
            occurred_at: self.now(),
        }))
    }

    pub fn approve(&self, order_id: OrderId) -> OrderResult {
        self.run(OrderCommand::Approve(Approve {
            order_id,
            occurred_at: self.now(),
        }))
    }

    pub fn reject(&self, order_id: OrderId, reason: impl Into<String>) -> OrderResult {
        self.run(OrderCommand::Reject(Reject {
            order_id,
            reason: reason.into(),
            occurred_at: self.now(),
        }))
    }

    pub fn request_additional_documents(
        &self,
        order_id: OrderId,
        documents: BTreeSet<RequiredDocument>,
    ) -> OrderResult {
        self.run(OrderCommand::RequestAdditionalDocuments(RequestAdditionalDocuments {
            order_id,
            documents,
            occurred_at: self.now(),
        }))
    }

    pub fn reopen(&self, order_id: OrderId) -> OrderResult {
        self.run(OrderCommand::Reopen(Reopen {
            order_id,
            occurred_at: self.now(),
        }))
    }

    /// Operational progress: Approved → InProgress → Completed.
    pub fn advance(&self, order_id: OrderId) -> OrderResult {
        self.run(OrderCommand::Advance(Advance {
            order_id,
            occurred_at: self.now(),
        }))
    }

    pub fn attach_document(&self, order_id: OrderId, document: NewDocument) -> OrderResult {
        self.run(OrderCommand::AttachDocument(AttachDocument {
            order_id,
            document,
            occurred_at: self.now(),
        }))
    }

    pub fn add_policy(
        &self,
        order_id: OrderId,
        policy: Policy,
        attachments: Vec<Attachment>,
    ) -> OrderResult {
        self.attach_document(
            order_id,
            NewDocument { draft: DocumentDraft::Policy(policy), attachments },
        )
    }

    pub fn add_customs_declaration(
        &self,
        order_id: OrderId,
        declaration: CustomsDeclaration,
        attachments: Vec<Attachment>,
    ) -> OrderResult {
        self.attach_document(
            order_id,
            NewDocument { draft: DocumentDraft::CustomsDeclaration(declaration), attachments },
        )
    }

    pub fn add_tax_slip(
        &self,
        order_id: OrderId,
        slip: TaxSlip,
        attachments: Vec<Attachment>,
    ) -> OrderResult {
        self.attach_document(
            order_id,
            NewDocument { draft: DocumentDraft::TaxSlip(slip), attachments },
        )
    }

    /// Totals are computed from the lines; the draft carries none.
    pub fn add_purchase_invoice(
        &self,
        order_id: OrderId,
        invoice: PurchaseInvoiceDraft,
        attachments: Vec<Attachment>,
    ) -> OrderResult {
        self.attach_document(
            order_id,
            NewDocument { draft: DocumentDraft::PurchaseInvoice(invoice), attachments },
        )
    }

    pub fn add_transport_leg(
        &self,
        order_id: OrderId,
        leg: TransportLeg,
        attachments: Vec<Attachment>,
    ) -> OrderResult {
        self.attach_document(
            order_id,
            NewDocument { draft: DocumentDraft::TransportLeg(leg), attachments },
        )
    }

    /// Post a message; a client message also schedules one auto-reply.
    pub fn send_message(
        &self,
        order_id: OrderId,
        sender: Sender,
        content: impl Into<String>,
    ) -> OrderResult {
        self.run(OrderCommand::SendMessage(SendMessage {
            order_id,
            sender,
            content: content.into(),
            occurred_at: self.now(),
        }))
    }

    pub fn mark_all_read(&self, order_id: OrderId, viewer: Sender) -> OrderResult {
        self.run(OrderCommand::MarkAllRead(MarkAllRead {
            order_id,
            viewer,
            occurred_at: self.now(),
        }))
    }

    /// Deliver every auto-reply due at `now`.
    ///
    /// Each claimed entry ends `Delivered`, `Cancelled` (the order completed
    /// meanwhile), `Failed`, or goes back to `Pending` after a transient
    /// error while retry attempts remain.
    pub fn deliver_due_replies(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport, DispatchError> {
        let retry = &self.config.conflict_retry;
        let claimed = self.replies.claim_due(now, DELIVERY_BATCH)?;
        let mut report = DeliveryReport {
            claimed: claimed.len(),
            ..Default::default()
        };

        for reply in claimed {
            let command = OrderCommand::DeliverAutoReply(DeliverAutoReply {
                order_id: reply.order_id,
                in_reply_to: reply.in_reply_to,
                occurred_at: now,
            });

            match self.handle(&command) {
                Ok(committed) if committed.is_noop() => {
                    self.replies.finish(reply.id, ReplyStatus::Cancelled)?;
                    report.cancelled += 1;
                }
                Ok(_) => {
                    self.replies.finish(reply.id, ReplyStatus::Delivered)?;
                    report.delivered += 1;
                }
                Err(DispatchError::Publish { version, message }) => {
                    // Saved at `version`; only the notification was lost.
                    warn!(
                        reply_id = %reply.id,
                        version,
                        error = %message,
                        "auto-reply committed but not published"
                    );
                    self.replies.finish(reply.id, ReplyStatus::Delivered)?;
                    report.delivered += 1;
                }
                Err(e) if e.is_retryable() && retry.should_retry(reply.attempts) => {
                    let delay = retry.delay_for_attempt(reply.attempts);
                    let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                    warn!(
                        reply_id = %reply.id,
                        attempts = reply.attempts,
                        error = %e,
                        "auto-reply delivery deferred"
                    );
                    self.replies.release(reply.id, retry_at)?;
                    report.released += 1;
                }
                Err(e) => {
                    warn!(
                        reply_id = %reply.id,
                        order_id = %reply.order_id,
                        error = %e,
                        "auto-reply delivery failed"
                    );
                    let failed = ReplyStatus::Failed { error: e.to_string() };
                    self.replies.finish(reply.id, failed)?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

impl<S, B, R> DeliverDue for OrderWorkflow<S, B, R>
where
    S: RecordStore<Order>,
    B: EventBus<EventEnvelope<JsonValue>> + Send + Sync,
    R: ReplySchedule,
{
    fn deliver_due(&self, now: DateTime<Utc>) -> Result<DeliveryReport, DispatchError> {
        self.deliver_due_replies(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;

    use brokerdesk_events::InMemoryEventBus;
    use brokerdesk_orders::{PaymentStatus, WeightUnit};

    use crate::record_store::InMemoryRecordStore;
    use crate::replies::InMemoryReplySchedule;
    use crate::retry::{retry_on_conflict, RetryPolicy};
    use crate::test_support::SwitchableBus;

    type TestWorkflow = OrderWorkflow<
        Arc<InMemoryRecordStore<Order>>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
        Arc<InMemoryReplySchedule>,
    >;

    fn workflow() -> TestWorkflow {
        OrderWorkflow::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryEventBus::new()),
            InMemoryReplySchedule::arc(),
            WorkflowConfig::default(),
        )
    }

    fn placed(wf: &TestWorkflow, services: &[ServiceKind]) -> OrderId {
        let order_id = OrderId::generate();
        wf.place_order(order_id, "ACME Trading", services.iter().copied().collect())
            .unwrap();
        order_id
    }

    fn policy(number: &str) -> Policy {
        Policy {
            policy_number: number.to_string(),
            source_name: "Jebel Ali".to_string(),
            importer_name: "ACME".to_string(),
            origin_country: "AE".to_string(),
            destination_country: "SA".to_string(),
            port: "Dammam".to_string(),
            package_count: 12,
            weight: 1.5,
            weight_unit: WeightUnit::Ton,
        }
    }

    #[test]
    fn place_order_uses_the_configured_locale() {
        let wf = OrderWorkflow::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryEventBus::new()),
            InMemoryReplySchedule::arc(),
            WorkflowConfig { locale: brokerdesk_orders::Locale::Ar, ..Default::default() },
        );
        let order_id = placed(&wf, &[ServiceKind::Import]);
        assert_eq!(wf.get(order_id).unwrap().locale(), brokerdesk_orders::Locale::Ar);
    }

    #[test]
    fn every_command_returns_the_saved_snapshot() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Shipping]);

        let approved = wf.approve(order_id).unwrap();
        assert_eq!(approved, wf.get(order_id).unwrap());
        assert_eq!(approved.version(), 2);
    }

    #[test]
    fn client_message_schedules_one_reply_and_staff_message_none() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Shipping]);

        wf.send_message(order_id, Sender::Staff, "documents received").unwrap();
        assert!(wf.replies().list_for_order(order_id).unwrap().is_empty());

        let order = wf.send_message(order_id, Sender::Client, "hello").unwrap();
        let scheduled = wf.replies().list_for_order(order_id).unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].status, ReplyStatus::Pending);
        assert_eq!(Some(scheduled[0].in_reply_to), order.messages().last().map(|m| m.id));
    }

    #[test]
    fn due_reply_is_delivered_once_as_a_staff_message() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Shipping]);
        let before = wf.send_message(order_id, Sender::Client, "hello").unwrap();

        let later = Utc::now() + chrono::Duration::seconds(10);
        let report = wf.deliver_due_replies(later).unwrap();
        assert_eq!(report.delivered, 1);

        let order = wf.get(order_id).unwrap();
        assert_eq!(order.messages().len(), before.messages().len() + 1);
        let reply = order.messages().last().unwrap();
        assert_eq!(reply.sender, Sender::Staff);
        assert!(reply.content.starts_with("Thank you for contacting us."));

        assert!(wf.deliver_due_replies(later).unwrap().is_empty());
    }

    #[test]
    fn replies_are_not_delivered_before_they_are_due() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Shipping]);
        wf.send_message(order_id, Sender::Client, "hello").unwrap();

        assert!(wf.deliver_due_replies(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn completing_the_order_cancels_pending_replies() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Shipping]);
        wf.approve(order_id).unwrap();
        wf.advance(order_id).unwrap();
        wf.send_message(order_id, Sender::Client, "any news?").unwrap();

        let completed = wf.advance(order_id).unwrap();
        assert_eq!(completed.status(), OrderStatus::Completed);

        let scheduled = wf.replies().list_for_order(order_id).unwrap();
        assert_eq!(scheduled[0].status, ReplyStatus::Cancelled);

        let later = Utc::now() + chrono::Duration::seconds(10);
        assert!(wf.deliver_due_replies(later).unwrap().is_empty());
        assert_eq!(wf.get(order_id).unwrap().messages(), completed.messages());
    }

    #[test]
    fn client_message_on_a_completed_order_schedules_nothing() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Storage]);
        wf.approve(order_id).unwrap();
        wf.advance(order_id).unwrap();
        wf.advance(order_id).unwrap();

        wf.send_message(order_id, Sender::Client, "thanks").unwrap();
        assert!(wf.replies().list_for_order(order_id).unwrap().is_empty());
    }

    #[test]
    fn unavailable_store_defers_the_reply() {
        let store = Arc::new(InMemoryRecordStore::new());
        let wf = OrderWorkflow::new(
            store.clone(),
            Arc::new(InMemoryEventBus::new()),
            InMemoryReplySchedule::arc(),
            WorkflowConfig::default(),
        );
        let order_id = placed(&wf, &[ServiceKind::Shipping]);
        wf.send_message(order_id, Sender::Client, "hello").unwrap();

        store.set_offline(true);
        let later = Utc::now() + chrono::Duration::seconds(10);
        let report = wf.deliver_due_replies(later).unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(
            wf.replies().list_for_order(order_id).unwrap()[0].status,
            ReplyStatus::Pending
        );

        store.set_offline(false);
        let report = wf.deliver_due_replies(later + chrono::Duration::seconds(10)).unwrap();
        assert_eq!(report.delivered, 1);
    }

    #[test]
    fn document_helpers_attach_each_kind() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Import]);
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        wf.add_policy(order_id, policy("PL-1"), Vec::new()).unwrap();
        wf.add_customs_declaration(
            order_id,
            CustomsDeclaration {
                declaration_number: "CD-7".to_string(),
                declared_on: day,
                amount: 125_000,
                payment_status: PaymentStatus::Unpaid,
            },
            Vec::new(),
        )
        .unwrap();
        wf.add_tax_slip(
            order_id,
            TaxSlip {
                slip_number: "TS-3".to_string(),
                issued_on: day,
                amount: 4_500,
                package_count: 2,
                payment_status: PaymentStatus::Paid,
            },
            Vec::new(),
        )
        .unwrap();

        let order = wf.get(order_id).unwrap();
        assert_eq!(order.documents().len(), 3);
        assert_eq!(order.status(), OrderStatus::PendingReview);
    }

    #[test]
    fn validation_failure_leaves_the_order_untouched() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Import]);
        let before = wf.get(order_id).unwrap();

        let mut bad = policy("PL-1");
        bad.package_count = -1;
        let err = wf.add_policy(order_id, bad, Vec::new()).unwrap_err();

        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(wf.get(order_id).unwrap(), before);
    }

    type SwitchableWorkflow = OrderWorkflow<
        Arc<InMemoryRecordStore<Order>>,
        Arc<SwitchableBus>,
        Arc<InMemoryReplySchedule>,
    >;

    fn workflow_on(bus: Arc<SwitchableBus>) -> SwitchableWorkflow {
        OrderWorkflow::new(
            Arc::new(InMemoryRecordStore::new()),
            bus,
            InMemoryReplySchedule::arc(),
            WorkflowConfig::default(),
        )
    }

    #[test]
    fn client_message_schedules_its_reply_even_when_the_bus_is_down() {
        let bus = Arc::new(SwitchableBus::default());
        let wf = workflow_on(bus.clone());
        let order_id = OrderId::generate();
        wf.place_order(order_id, "ACME Trading", BTreeSet::from([ServiceKind::Shipping]))
            .unwrap();

        bus.set_down(true);
        let err = wf.send_message(order_id, Sender::Client, "hello").unwrap_err();
        assert!(matches!(err, DispatchError::Publish { version: 2, .. }));

        let order = wf.get(order_id).unwrap();
        assert_eq!(order.unread_count(Sender::Staff), 1);
        let scheduled = wf.replies().list_for_order(order_id).unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].status, ReplyStatus::Pending);
    }

    #[test]
    fn completion_cancels_replies_even_when_the_bus_is_down() {
        let bus = Arc::new(SwitchableBus::default());
        let wf = workflow_on(bus.clone());
        let order_id = OrderId::generate();
        wf.place_order(order_id, "ACME Trading", BTreeSet::from([ServiceKind::Export]))
            .unwrap();
        wf.approve(order_id).unwrap();
        wf.advance(order_id).unwrap();
        wf.send_message(order_id, Sender::Client, "any news?").unwrap();

        bus.set_down(true);
        assert!(matches!(wf.advance(order_id), Err(DispatchError::Publish { .. })));
        assert_eq!(wf.get(order_id).unwrap().status(), OrderStatus::Completed);
        let scheduled = wf.replies().list_for_order(order_id).unwrap();
        assert_eq!(scheduled[0].status, ReplyStatus::Cancelled);
    }

    #[test]
    fn reply_saved_but_not_published_counts_as_delivered() {
        let bus = Arc::new(SwitchableBus::default());
        let wf = workflow_on(bus.clone());
        let order_id = OrderId::generate();
        wf.place_order(order_id, "ACME Trading", BTreeSet::from([ServiceKind::Shipping]))
            .unwrap();
        let before = wf.send_message(order_id, Sender::Client, "hello").unwrap();

        bus.set_down(true);
        let later = Utc::now() + chrono::Duration::seconds(10);
        let report = wf.deliver_due_replies(later).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);

        let scheduled = wf.replies().list_for_order(order_id).unwrap();
        assert_eq!(scheduled[0].status, ReplyStatus::Delivered);
        let order = wf.get(order_id).unwrap();
        assert_eq!(order.messages().len(), before.messages().len() + 1);

        bus.set_down(false);
        assert!(wf.deliver_due_replies(later).unwrap().is_empty());
    }

    #[test]
    fn duplicate_placement_is_not_retried() {
        let wf = workflow();
        let order_id = placed(&wf, &[ServiceKind::Shipping]);

        let mut calls = 0;
        let policy = RetryPolicy::fixed(5, std::time::Duration::from_millis(1));
        let err = retry_on_conflict(&policy, || {
            calls += 1;
            wf.place_order(order_id, "ACME Trading", BTreeSet::from([ServiceKind::Shipping]))
        })
        .unwrap_err();

        assert!(matches!(err, DispatchError::AlreadyExists(_)));
        assert_eq!(calls, 1);
        assert_eq!(wf.get(order_id).unwrap().version(), 1);
    }
}
