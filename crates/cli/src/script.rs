//! JSON command scripts.
//!
//! A script is a JSON array of steps, each tagged by `op`. Orders are named
//! by script-local aliases (`"order": "o1"`); `place` binds an alias to a
//! fresh order id and later steps resolve it.
//!
//! ```json
//! [
//!   { "op": "place", "order": "o1", "client_ref": "ACME", "services": ["shipping"] },
//!   { "op": "approve", "order": "o1" },
//!   { "op": "send-message", "order": "o1", "sender": "client", "content": "hello" }
//! ]
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use brokerdesk_events::{EventEnvelope, InMemoryEventBus};
use brokerdesk_infra::replies::DeliveryReport;
use brokerdesk_infra::{
    retry_on_conflict, DispatchError, InMemoryRecordStore, InMemoryReplySchedule, OrderWorkflow,
    WorkflowConfig,
};
use brokerdesk_orders::{
    Attachment, CustomsDeclaration, Order, OrderId, Policy, PurchaseInvoiceDraft,
    RequiredDocument, Sender, ServiceKind, TaxSlip, TransportLeg,
};

pub type Workflow = OrderWorkflow<
    Arc<InMemoryRecordStore<Order>>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    Arc<InMemoryReplySchedule>,
>;

pub fn in_memory_workflow(config: WorkflowConfig) -> Workflow {
    OrderWorkflow::new(
        Arc::new(InMemoryRecordStore::new()),
        Arc::new(InMemoryEventBus::new()),
        InMemoryReplySchedule::arc(),
        config,
    )
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    Place {
        order: String,
        client_ref: String,
        services: BTreeSet<ServiceKind>,
    },
    Approve {
        order: String,
    },
    Reject {
        order: String,
        reason: String,
    },
    RequestDocuments {
        order: String,
        documents: BTreeSet<RequiredDocument>,
    },
    Reopen {
        order: String,
    },
    Advance {
        order: String,
    },
    AddPolicy {
        order: String,
        record: Policy,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    AddCustomsDeclaration {
        order: String,
        record: CustomsDeclaration,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    AddTaxSlip {
        order: String,
        record: TaxSlip,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    AddPurchaseInvoice {
        order: String,
        record: PurchaseInvoiceDraft,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    AddTransportLeg {
        order: String,
        record: TransportLeg,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    SendMessage {
        order: String,
        sender: Sender,
        content: String,
    },
    MarkRead {
        order: String,
        viewer: Sender,
    },
    /// Fire every auto-reply due `after_ms` from now (default: the configured delay).
    DeliverReplies {
        #[serde(default)]
        after_ms: Option<u64>,
    },
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::Place { .. } => "place",
            Step::Approve { .. } => "approve",
            Step::Reject { .. } => "reject",
            Step::RequestDocuments { .. } => "request-documents",
            Step::Reopen { .. } => "reopen",
            Step::Advance { .. } => "advance",
            Step::AddPolicy { .. } => "add-policy",
            Step::AddCustomsDeclaration { .. } => "add-customs-declaration",
            Step::AddTaxSlip { .. } => "add-tax-slip",
            Step::AddPurchaseInvoice { .. } => "add-purchase-invoice",
            Step::AddTransportLeg { .. } => "add-transport-leg",
            Step::SendMessage { .. } => "send-message",
            Step::MarkRead { .. } => "mark-read",
            Step::DeliverReplies { .. } => "deliver-replies",
        }
    }
}

pub fn parse_script(json: &str) -> serde_json::Result<Vec<Step>> {
    serde_json::from_str(json)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&DispatchError> for ErrorReport {
    fn from(err: &DispatchError) -> Self {
        let kind = match err {
            DispatchError::Validation(_) => "validation",
            DispatchError::InvalidArgument(_) => "invalid_argument",
            DispatchError::IllegalTransition(_) => "illegal_transition",
            DispatchError::InvariantViolation(_) => "invariant_violation",
            DispatchError::NotFound => "not_found",
            DispatchError::AlreadyExists(_) => "already_exists",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::Store(_) => "store",
            DispatchError::Serialize(_) => "serialize",
            DispatchError::Publish { .. } => "publish",
            DispatchError::Schedule(_) => "schedule",
        };
        Self {
            kind,
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Order(Box<Order>),
    Replies(DeliveryReport),
    Error(ErrorReport),
}

/// One line of script output.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: usize,
    pub op: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl StepResult {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Runs steps in order against one workflow, resolving order aliases.
pub struct ScriptRunner {
    workflow: Workflow,
    aliases: HashMap<String, OrderId>,
}

impl ScriptRunner {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            aliases: HashMap::new(),
        }
    }

    pub fn run(&mut self, steps: Vec<Step>) -> Vec<StepResult> {
        steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| self.run_step(i + 1, step))
            .collect()
    }

    pub fn run_step(&mut self, index: usize, step: Step) -> StepResult {
        let op = step.op();
        let outcome = match self.execute(step) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Error(ErrorReport::from(&err)),
        };
        StepResult { step: index, op, outcome }
    }

    /// Unknown aliases bind to a fresh id: `place` creates it, other steps get not found.
    fn resolve(&mut self, alias: &str) -> OrderId {
        *self
            .aliases
            .entry(alias.to_string())
            .or_insert_with(OrderId::generate)
    }

    fn execute(&mut self, step: Step) -> Result<Outcome, DispatchError> {
        let retry = self.workflow.config().conflict_retry.clone();

        let order = match step {
            Step::Place { order, client_ref, services } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow.place_order(id, client_ref.clone(), services.clone())
                })?
            }
            Step::Approve { order } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || self.workflow.approve(id))?
            }
            Step::Reject { order, reason } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || self.workflow.reject(id, reason.clone()))?
            }
            Step::RequestDocuments { order, documents } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow.request_additional_documents(id, documents.clone())
                })?
            }
            Step::Reopen { order } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || self.workflow.reopen(id))?
            }
            Step::Advance { order } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || self.workflow.advance(id))?
            }
            Step::AddPolicy { order, record, attachments } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow.add_policy(id, record.clone(), attachments.clone())
                })?
            }
            Step::AddCustomsDeclaration { order, record, attachments } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow
                        .add_customs_declaration(id, record.clone(), attachments.clone())
                })?
            }
            Step::AddTaxSlip { order, record, attachments } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow.add_tax_slip(id, record.clone(), attachments.clone())
                })?
            }
            Step::AddPurchaseInvoice { order, record, attachments } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow
                        .add_purchase_invoice(id, record.clone(), attachments.clone())
                })?
            }
            Step::AddTransportLeg { order, record, attachments } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow.add_transport_leg(id, record.clone(), attachments.clone())
                })?
            }
            Step::SendMessage { order, sender, content } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || {
                    self.workflow.send_message(id, sender, content.clone())
                })?
            }
            Step::MarkRead { order, viewer } => {
                let id = self.resolve(&order);
                retry_on_conflict(&retry, || self.workflow.mark_all_read(id, viewer))?
            }
            Step::DeliverReplies { after_ms } => {
                let after = match after_ms {
                    Some(ms) => Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX)),
                    None => self.workflow.config().auto_reply_delay_chrono(),
                };
                let report = self.workflow.deliver_due_replies(Utc::now() + after)?;
                return Ok(Outcome::Replies(report));
            }
        };

        Ok(Outcome::Order(Box::new(order)))
    }
}
