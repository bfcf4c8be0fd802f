//! Integration tests for the full order pipeline.
//!
//! Tests: Command → Record Store → Event Bus → Order Board, plus the
//! auto-reply schedule and worker.
//!
//! Verifies:
//! - Lifecycle scenarios end-to-end through the workflow surface
//! - Optimistic concurrency conflicts are detected, and retried appends are never lost
//! - Auto-replies fire once and are cancelled by completion

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::Value as JsonValue;

    use brokerdesk_core::AggregateRoot;
    use brokerdesk_events::{EventEnvelope, InMemoryEventBus};
    use brokerdesk_orders::{
        CheckpointKind, Order, OrderId, OrderStatus, Policy, RequiredDocument, Sender,
        ServiceKind, WeightUnit,
    };

    use crate::command_dispatcher::DispatchError;
    use crate::config::WorkflowConfig;
    use crate::projections::{OrderBoardEntry, OrderBoardProjection};
    use crate::read_model::InMemoryReadStore;
    use crate::record_store::{InMemoryRecordStore, RecordStore, StoreError};
    use crate::replies::{ReplySchedule, ReplyStatus, ReplyWorker, ReplyWorkerConfig};
    use crate::replies::InMemoryReplySchedule;
    use crate::retry::{retry_on_conflict, RetryPolicy};
    use crate::workers::ProjectionWorker;
    use crate::workflow::OrderWorkflow;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Store = Arc<InMemoryRecordStore<Order>>;
    type Workflow = OrderWorkflow<Store, Bus, Arc<InMemoryReplySchedule>>;

    fn setup_with(config: WorkflowConfig) -> (Arc<Workflow>, Store, Bus) {
        let store: Store = Arc::new(InMemoryRecordStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let wf =
            OrderWorkflow::new(store.clone(), bus.clone(), InMemoryReplySchedule::arc(), config);
        (Arc::new(wf), store, bus)
    }

    fn setup() -> (Arc<Workflow>, Store, Bus) {
        setup_with(WorkflowConfig::default())
    }

    fn place(wf: &Workflow, services: &[ServiceKind]) -> OrderId {
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
            package_count: 3,
            weight: 410.0,
            weight_unit: WeightUnit::Kg,
        }
    }

    fn kinds(order: &Order) -> Vec<(CheckpointKind, bool)> {
        order.tracking().iter().map(|c| (c.kind, c.completed)).collect()
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn approve_with_shipping_regenerates_the_timeline_and_posts_one_message() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Shipping]);
        let before = wf.get(order_id).unwrap();

        let order = wf.approve(order_id).unwrap();

        assert_eq!(order.status(), OrderStatus::Approved);
        assert_eq!(
            kinds(&order),
            vec![
                (CheckpointKind::Received, true),
                (CheckpointKind::ApprovedForProcessing, true),
                (CheckpointKind::ShipmentPackaging, false),
                (CheckpointKind::FinalCompletion, false),
            ]
        );
        assert_eq!(order.messages().len(), before.messages().len() + 1);
        assert_eq!(order.messages().last().unwrap().sender, Sender::System);
    }

    #[test]
    fn approve_with_transport_only_yields_a_single_transport_checkpoint() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Transport]);

        let order = wf.approve(order_id).unwrap();
        let service: Vec<_> = order
            .tracking()
            .iter()
            .filter(|c| c.kind.is_service())
            .map(|c| c.kind)
            .collect();
        assert_eq!(service, vec![CheckpointKind::TransportPreparation]);
    }

    #[test]
    fn approve_from_any_other_status_fails_and_leaves_the_record_identical() {
        let (wf, _store, _bus) = setup();

        let rejected = place(&wf, &[ServiceKind::Import]);
        wf.reject(rejected, "missing invoice").unwrap();

        let awaiting = place(&wf, &[ServiceKind::Import]);
        let health = BTreeSet::from([RequiredDocument::HealthCertificate]);
        wf.request_additional_documents(awaiting, health).unwrap();

        let in_progress = place(&wf, &[ServiceKind::Import]);
        wf.approve(in_progress).unwrap();
        wf.advance(in_progress).unwrap();

        for order_id in [rejected, awaiting, in_progress] {
            let before = serde_json::to_vec(&wf.get(order_id).unwrap()).unwrap();
            let err = wf.approve(order_id).unwrap_err();
            assert!(matches!(err, DispatchError::IllegalTransition(_)), "{err:?}");
            let after = serde_json::to_vec(&wf.get(order_id).unwrap()).unwrap();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn reject_with_empty_reason_is_an_invalid_argument() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Export]);

        let err = wf.reject(order_id, "").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument(_)));
        assert_eq!(wf.get(order_id).unwrap().status(), OrderStatus::PendingReview);
    }

    #[test]
    fn reject_then_reopen_round_trip() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Export]);

        let rejected = wf.reject(order_id, "missing invoice").unwrap();
        assert_eq!(rejected.status(), OrderStatus::Rejected);
        assert_eq!(rejected.rejection_reason(), Some("missing invoice"));
        assert!(rejected.messages().last().unwrap().content.contains("missing invoice"));

        let reopened = wf.reopen(order_id).unwrap();
        assert_eq!(reopened.status(), OrderStatus::PendingReview);
        assert_eq!(reopened.rejection_reason(), None);
    }

    #[test]
    fn only_reopen_leaves_rejected_and_awaiting() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Import]);
        wf.request_additional_documents(order_id, BTreeSet::from([RequiredDocument::BillOfLading]))
            .unwrap();

        assert!(wf.approve(order_id).is_err());
        assert!(wf.reject(order_id, "late").is_err());
        assert!(wf.advance(order_id).is_err());
        let invoice = BTreeSet::from([RequiredDocument::PurchaseInvoice]);
        assert!(wf.request_additional_documents(order_id, invoice).is_err());

        let reopened = wf.reopen(order_id).unwrap();
        assert_eq!(reopened.status(), OrderStatus::PendingReview);
        assert!(reopened.required_documents().is_empty());
    }

    #[test]
    fn policies_are_appended_in_order() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Shipping]);

        wf.add_policy(order_id, policy("PL-1"), Vec::new()).unwrap();
        let order = wf.add_policy(order_id, policy("PL-2"), Vec::new()).unwrap();

        let numbers: Vec<_> = order
            .documents()
            .policies()
            .iter()
            .map(|p| p.record.policy_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["PL-1", "PL-2"]);
        assert_eq!(order.status(), OrderStatus::PendingReview);
    }

    #[test]
    fn client_message_raises_staff_unread_until_staff_reads() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Shipping]);
        let staff_before = wf.unread_count(order_id, Sender::Staff).unwrap();

        let order = wf.send_message(order_id, Sender::Client, "hello").unwrap();
        let message = order.messages().last().unwrap();
        assert_eq!(message.sender, Sender::Client);
        assert!(!message.is_read);
        assert_eq!(wf.unread_count(order_id, Sender::Staff).unwrap(), staff_before + 1);

        wf.mark_all_read(order_id, Sender::Staff).unwrap();
        assert_eq!(wf.unread_count(order_id, Sender::Staff).unwrap(), 0);
    }

    #[test]
    fn client_mark_all_read_clears_client_unread() {
        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Shipping]);
        wf.approve(order_id).unwrap();
        wf.send_message(order_id, Sender::Staff, "please send the invoice").unwrap();
        assert!(wf.unread_count(order_id, Sender::Client).unwrap() >= 3);

        wf.mark_all_read(order_id, Sender::Client).unwrap();
        assert_eq!(wf.unread_count(order_id, Sender::Client).unwrap(), 0);
    }

    #[test]
    fn stale_save_is_a_conflict_and_changes_nothing() {
        let (wf, store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Shipping]);

        let stale = store.load(&order_id).unwrap();
        wf.approve(order_id).unwrap();
        let current = wf.get(order_id).unwrap();

        let err = store.save(&stale).unwrap_err();
        assert_eq!(err, StoreError::Conflict { expected: 1, actual: 2 });
        assert_eq!(wf.get(order_id).unwrap(), current);
    }

    #[test]
    fn concurrent_policy_appends_with_retry_are_never_lost() {
        const WRITERS: usize = 8;

        let (wf, _store, _bus) = setup();
        let order_id = place(&wf, &[ServiceKind::Shipping]);
        let retry = RetryPolicy::fixed(100, Duration::from_millis(1));

        let handles: Vec<_> = (0..WRITERS)
            .map(|n| {
                let wf = wf.clone();
                let retry = retry.clone();
                thread::spawn(move || {
                    retry_on_conflict(&retry, || {
                        wf.add_policy(order_id, policy(&format!("PL-{n}")), Vec::new())
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let order = wf.get(order_id).unwrap();
        assert_eq!(order.documents().policies().len(), WRITERS);
        assert_eq!(order.version(), 1 + WRITERS as u64);

        let ids: BTreeSet<_> = order.documents().policies().iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), WRITERS);
    }

    #[test]
    fn reply_worker_delivers_the_auto_reply_once() {
        let config = WorkflowConfig {
            auto_reply_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (wf, _store, _bus) = setup_with(config);
        let order_id = place(&wf, &[ServiceKind::Shipping]);
        let sent = wf.send_message(order_id, Sender::Client, "hello").unwrap();

        let worker = ReplyWorker::new(wf.clone())
            .spawn(ReplyWorkerConfig::default().with_poll_interval(Duration::from_millis(5)))
            .unwrap();

        let delivered = wait_until(|| {
            wf.replies()
                .list_for_order(order_id)
                .map(|r| r.iter().all(|e| e.status == ReplyStatus::Delivered))
                .unwrap_or(false)
        });
        thread::sleep(Duration::from_millis(30));
        let stats = worker.stats();
        worker.shutdown();

        assert!(delivered);
        assert_eq!(stats.delivered, 1);
        let order = wf.get(order_id).unwrap();
        assert_eq!(order.messages().len(), sent.messages().len() + 1);
        assert_eq!(order.messages().last().unwrap().sender, Sender::Staff);
    }

    #[test]
    fn completion_cancels_the_pending_auto_reply() {
        let config = WorkflowConfig {
            auto_reply_delay: Duration::from_secs(3600),
            ..Default::default()
        };
        let (wf, _store, _bus) = setup_with(config);
        let order_id = place(&wf, &[ServiceKind::Storage]);
        wf.approve(order_id).unwrap();
        wf.send_message(order_id, Sender::Client, "where is my cargo?").unwrap();
        wf.advance(order_id).unwrap();
        let completed = wf.advance(order_id).unwrap();

        assert!(completed.tracking().iter().all(|c| c.completed));
        let replies = wf.replies().list_for_order(order_id).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].status, ReplyStatus::Cancelled);

        let far_future = Utc::now() + chrono::Duration::days(1);
        assert!(wf.deliver_due_replies(far_future).unwrap().is_empty());
        assert_eq!(wf.get(order_id).unwrap(), completed);
    }

    #[test]
    fn board_worker_follows_the_bus() {
        let (wf, _store, bus) = setup();
        let board = Arc::new(OrderBoardProjection::new(Arc::new(InMemoryReadStore::<
            OrderId,
            OrderBoardEntry,
        >::new())));

        let sink = board.clone();
        let worker =
            ProjectionWorker::spawn("order-board", &bus, move |env: EventEnvelope<JsonValue>| {
                sink.apply_envelope(&env)
            })
            .unwrap();

        let order_id = place(&wf, &[ServiceKind::Import, ServiceKind::Export]);
        wf.approve(order_id).unwrap();
        wf.add_policy(order_id, policy("PL-1"), Vec::new()).unwrap();
        wf.send_message(order_id, Sender::Client, "hello").unwrap();
        // place(3) + approve(3) + policy(2) + message(1)
        let published = 9;

        assert!(wait_until(|| worker.processed() >= published));
        assert_eq!(worker.failed(), 0);
        worker.shutdown();

        let order = wf.get(order_id).unwrap();
        let entry = board.get(&order_id).unwrap();
        assert_eq!(entry.status, OrderStatus::Approved);
        assert_eq!(entry.document_count(brokerdesk_orders::DocumentKind::Policy), 1);
        assert_eq!(entry.message_count, order.messages().len());
        assert_eq!(entry.staff_unread(), order.unread_count(Sender::Staff));
        assert_eq!(entry.checkpoints_total, order.tracking().len());
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Approve,
        Reject,
        Request,
        Reopen,
        Advance,
        Message(Sender),
        Read(Sender),
    }

    fn step() -> impl Strategy<Value = Step> {
        let sender = prop_oneof![Just(Sender::Client), Just(Sender::Staff)];
        prop_oneof![
            Just(Step::Approve),
            Just(Step::Reject),
            Just(Step::Request),
            Just(Step::Reopen),
            Just(Step::Advance),
            sender.clone().prop_map(Step::Message),
            sender.prop_map(Step::Read),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn version_counts_exactly_the_committed_commands(steps in proptest::collection::vec(step(), 0..24)) {
            let (wf, _store, _bus) = setup();
            let order_id = place(&wf, &[ServiceKind::Shipping, ServiceKind::Import]);
            let mut expected_version = 1;

            for s in steps {
                let before = wf.get(order_id).unwrap();
                let result = match s {
                    Step::Approve => wf.approve(order_id),
                    Step::Reject => wf.reject(order_id, "incomplete"),
                    Step::Request => wf.request_additional_documents(
                        order_id,
                        BTreeSet::from([RequiredDocument::CertificateOfOrigin]),
                    ),
                    Step::Reopen => wf.reopen(order_id),
                    Step::Advance => wf.advance(order_id),
                    Step::Message(sender) => wf.send_message(order_id, sender, "note"),
                    Step::Read(viewer) => wf.mark_all_read(order_id, viewer),
                };

                match result {
                    Ok(order) => {
                        if order != before {
                            expected_version += 1;
                        }
                        prop_assert_eq!(order.version(), expected_version);
                    }
                    Err(DispatchError::IllegalTransition(_)) => {
                        prop_assert_eq!(wf.get(order_id).unwrap(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }
            }
        }
    }
}
