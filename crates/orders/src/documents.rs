//! Sub-documents attached to an order.
//!
//! Each kind is validated on attach, gets a per-order sequence id (unique
//! across kinds) and is appended to its own collection. Collections only
//! grow. Monetary amounts are integer minor units (e.g. halalas).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use brokerdesk_core::DomainError;

use crate::messaging::Sender;
use crate::notify::{self, Notice};
use crate::order::{AttachDocument, DocumentAttached, Order, OrderEvent};

/// VAT applied to purchase invoices, in basis points.
pub const VAT_BASIS_POINTS: i64 = 1_500;

/// Document identifier, a per-order sequence number starting at 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u32);

impl core::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "D-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Policy,
    CustomsDeclaration,
    TaxSlip,
    PurchaseInvoice,
    TransportLeg,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 5] = [
        DocumentKind::Policy,
        DocumentKind::CustomsDeclaration,
        DocumentKind::TaxSlip,
        DocumentKind::PurchaseInvoice,
        DocumentKind::TransportLeg,
    ];
}

/// Documents staff can ask the client for before review continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredDocument {
    CertificateOfOrigin,
    CertificateOfConformity,
    HealthCertificate,
    AuthorizationLetter,
    BillOfLading,
    PurchaseInvoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Partial,
}

impl core::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "partial" => Ok(PaymentStatus::Partial),
            other => Err(DomainError::validation(format!(
                "payment_status must be unpaid, paid or partial (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Kg,
    Ton,
}

/// Reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub uri: String,
}

/// Bill of lading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_number: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub importer_name: String,
    #[serde(default)]
    pub origin_country: String,
    #[serde(default)]
    pub destination_country: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub package_count: i64,
    #[serde(default)]
    pub weight: f64,
    pub weight_unit: WeightUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomsDeclaration {
    pub declaration_number: String,
    pub declared_on: NaiveDate,
    pub amount: i64,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSlip {
    pub slip_number: String,
    pub issued_on: NaiveDate,
    pub amount: i64,
    #[serde(default)]
    pub package_count: i64,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub item: String,
    #[serde(default)]
    pub description: String,
    pub quantity: i64,
    #[serde(default)]
    pub origin_country: String,
    pub currency: String,
    pub amount: i64,
}

/// Purchase invoice as entered; totals are computed on attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseInvoiceDraft {
    #[serde(default)]
    pub invoice_number: Option<String>,
    pub supplier: String,
    pub issued_on: NaiveDate,
    pub lines: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseInvoice {
    pub invoice_number: Option<String>,
    pub supplier: String,
    pub issued_on: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Point-to-point ground transport segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportLeg {
    pub origin: Place,
    pub destination: Place,
    pub distance_km: f64,
    pub estimated_minutes: i64,
}

/// Document payload as submitted by a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentDraft {
    Policy(Policy),
    CustomsDeclaration(CustomsDeclaration),
    TaxSlip(TaxSlip),
    PurchaseInvoice(PurchaseInvoiceDraft),
    TransportLeg(TransportLeg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub draft: DocumentDraft,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Validated document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentBody {
    Policy(Policy),
    CustomsDeclaration(CustomsDeclaration),
    TaxSlip(TaxSlip),
    PurchaseInvoice(PurchaseInvoice),
    TransportLeg(TransportLeg),
}

impl DocumentBody {
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentBody::Policy(_) => DocumentKind::Policy,
            DocumentBody::CustomsDeclaration(_) => DocumentKind::CustomsDeclaration,
            DocumentBody::TaxSlip(_) => DocumentKind::TaxSlip,
            DocumentBody::PurchaseInvoice(_) => DocumentKind::PurchaseInvoice,
            DocumentBody::TransportLeg(_) => DocumentKind::TransportLeg,
        }
    }

    /// Kind-specific reference number, if the kind has one.
    pub fn reference(&self) -> Option<&str> {
        match self {
            DocumentBody::Policy(p) => Some(&p.policy_number),
            DocumentBody::CustomsDeclaration(c) => Some(&c.declaration_number),
            DocumentBody::TaxSlip(t) => Some(&t.slip_number),
            DocumentBody::PurchaseInvoice(i) => i.invoice_number.as_deref(),
            DocumentBody::TransportLeg(_) => None,
        }
    }
}

/// A document as committed on the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedDocument {
    pub id: DocumentId,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub body: DocumentBody,
}

/// Attached record of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attached<T> {
    pub id: DocumentId,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub record: T,
}

/// Per-kind document collections of an order, in append order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderDocuments {
    policies: Vec<Attached<Policy>>,
    customs_declarations: Vec<Attached<CustomsDeclaration>>,
    tax_slips: Vec<Attached<TaxSlip>>,
    purchase_invoices: Vec<Attached<PurchaseInvoice>>,
    transport_legs: Vec<Attached<TransportLeg>>,
}

impl OrderDocuments {
    pub fn policies(&self) -> &[Attached<Policy>] {
        &self.policies
    }

    pub fn customs_declarations(&self) -> &[Attached<CustomsDeclaration>] {
        &self.customs_declarations
    }

    pub fn tax_slips(&self) -> &[Attached<TaxSlip>] {
        &self.tax_slips
    }

    pub fn purchase_invoices(&self) -> &[Attached<PurchaseInvoice>] {
        &self.purchase_invoices
    }

    pub fn transport_legs(&self) -> &[Attached<TransportLeg>] {
        &self.transport_legs
    }

    pub fn count(&self, kind: DocumentKind) -> usize {
        match kind {
            DocumentKind::Policy => self.policies.len(),
            DocumentKind::CustomsDeclaration => self.customs_declarations.len(),
            DocumentKind::TaxSlip => self.tax_slips.len(),
            DocumentKind::PurchaseInvoice => self.purchase_invoices.len(),
            DocumentKind::TransportLeg => self.transport_legs.len(),
        }
    }

    pub fn len(&self) -> usize {
        DocumentKind::ALL.into_iter().map(|k| self.count(k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_id(&self) -> DocumentId {
        DocumentId(self.len() as u32 + 1)
    }

    pub(crate) fn push(&mut self, document: AttachedDocument) {
        let AttachedDocument {
            id,
            created_at,
            attachments,
            body,
        } = document;

        fn wrap<T>(
            id: DocumentId,
            created_at: DateTime<Utc>,
            attachments: Vec<Attachment>,
            record: T,
        ) -> Attached<T> {
            Attached {
                id,
                created_at,
                attachments,
                record,
            }
        }

        match body {
            DocumentBody::Policy(r) => self.policies.push(wrap(id, created_at, attachments, r)),
            DocumentBody::CustomsDeclaration(r) => {
                self.customs_declarations.push(wrap(id, created_at, attachments, r))
            }
            DocumentBody::TaxSlip(r) => self.tax_slips.push(wrap(id, created_at, attachments, r)),
            DocumentBody::PurchaseInvoice(r) => {
                self.purchase_invoices.push(wrap(id, created_at, attachments, r))
            }
            DocumentBody::TransportLeg(r) => {
                self.transport_legs.push(wrap(id, created_at, attachments, r))
            }
        }
    }
}

fn required(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn non_negative(field: &str, value: i64) -> Result<(), DomainError> {
    if value < 0 {
        return Err(DomainError::validation(format!("{field} must not be negative")));
    }
    Ok(())
}

fn non_negative_measure(field: &str, value: f64) -> Result<(), DomainError> {
    if !value.is_finite() || value < 0.0 {
        return Err(DomainError::validation(format!(
            "{field} must be a finite, non-negative number"
        )));
    }
    Ok(())
}

fn within(field: &str, value: f64, bound: f64) -> Result<(), DomainError> {
    if !value.is_finite() || value < -bound || value > bound {
        return Err(DomainError::validation(format!(
            "{field} must be within [-{bound}, {bound}]"
        )));
    }
    Ok(())
}

/// Tax on `subtotal` at `VAT_BASIS_POINTS`, rounded half-up.
pub fn vat(subtotal: i64) -> Result<i64, DomainError> {
    subtotal
        .checked_mul(VAT_BASIS_POINTS)
        .and_then(|v| v.checked_add(5_000))
        .map(|v| v / 10_000)
        .ok_or_else(|| DomainError::validation("invoice amount out of range"))
}

impl Policy {
    fn validate(&self) -> Result<(), DomainError> {
        required("policy_number", &self.policy_number)?;
        non_negative("package_count", self.package_count)?;
        non_negative_measure("weight", self.weight)
    }
}

impl CustomsDeclaration {
    fn validate(&self) -> Result<(), DomainError> {
        required("declaration_number", &self.declaration_number)?;
        non_negative("amount", self.amount)
    }
}

impl TaxSlip {
    fn validate(&self) -> Result<(), DomainError> {
        required("slip_number", &self.slip_number)?;
        non_negative("amount", self.amount)?;
        non_negative("package_count", self.package_count)
    }
}

impl InvoiceLine {
    fn validate(&self) -> Result<(), DomainError> {
        required("item", &self.item)?;
        non_negative("quantity", self.quantity)?;
        non_negative("amount", self.amount)?;
        if self.currency.len() != 3 || !self.currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(DomainError::validation(format!(
                "currency must be a three-letter ISO code (got {:?})",
                self.currency
            )));
        }
        Ok(())
    }
}

impl PurchaseInvoiceDraft {
    /// Validate lines and compute subtotal, VAT and total.
    pub fn finalize(&self) -> Result<PurchaseInvoice, DomainError> {
        required("supplier", &self.supplier)?;
        if self.lines.is_empty() {
            return Err(DomainError::validation("invoice needs at least one line"));
        }

        let mut subtotal: i64 = 0;
        for line in &self.lines {
            line.validate()?;
            subtotal = subtotal
                .checked_add(line.amount)
                .ok_or_else(|| DomainError::validation("invoice amount out of range"))?;
        }
        let tax = vat(subtotal)?;
        let total = subtotal
            .checked_add(tax)
            .ok_or_else(|| DomainError::validation("invoice amount out of range"))?;

        let invoice_number = self
            .invoice_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        Ok(PurchaseInvoice {
            invoice_number,
            supplier: self.supplier.clone(),
            issued_on: self.issued_on,
            lines: self.lines.clone(),
            subtotal,
            tax,
            total,
        })
    }
}

impl Place {
    fn validate(&self, field: &str) -> Result<(), DomainError> {
        required(&format!("{field}.name"), &self.name)?;
        within(&format!("{field}.latitude"), self.latitude, 90.0)?;
        within(&format!("{field}.longitude"), self.longitude, 180.0)
    }
}

impl TransportLeg {
    fn validate(&self) -> Result<(), DomainError> {
        self.origin.validate("origin")?;
        self.destination.validate("destination")?;
        non_negative_measure("distance_km", self.distance_km)?;
        non_negative("estimated_minutes", self.estimated_minutes)
    }
}

impl DocumentDraft {
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentDraft::Policy(_) => DocumentKind::Policy,
            DocumentDraft::CustomsDeclaration(_) => DocumentKind::CustomsDeclaration,
            DocumentDraft::TaxSlip(_) => DocumentKind::TaxSlip,
            DocumentDraft::PurchaseInvoice(_) => DocumentKind::PurchaseInvoice,
            DocumentDraft::TransportLeg(_) => DocumentKind::TransportLeg,
        }
    }

    /// Check field constraints and produce the body to attach.
    pub fn validate(&self) -> Result<DocumentBody, DomainError> {
        Ok(match self {
            DocumentDraft::Policy(p) => {
                p.validate()?;
                DocumentBody::Policy(p.clone())
            }
            DocumentDraft::CustomsDeclaration(c) => {
                c.validate()?;
                DocumentBody::CustomsDeclaration(c.clone())
            }
            DocumentDraft::TaxSlip(t) => {
                t.validate()?;
                DocumentBody::TaxSlip(t.clone())
            }
            DocumentDraft::PurchaseInvoice(i) => DocumentBody::PurchaseInvoice(i.finalize()?),
            DocumentDraft::TransportLeg(l) => {
                l.validate()?;
                DocumentBody::TransportLeg(l.clone())
            }
        })
    }
}

impl Order {
    pub(crate) fn handle_attach_document(
        &self,
        cmd: &AttachDocument,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed(cmd.order_id)?;

        let body = cmd.document.draft.validate()?;
        for attachment in &cmd.document.attachments {
            required("attachment name", &attachment.name)?;
        }

        let document = AttachedDocument {
            id: self.documents.next_id(),
            created_at: cmd.occurred_at,
            attachments: cmd.document.attachments.clone(),
            body,
        };

        let content = notify::compose(
            &Notice::DocumentsAdded {
                kind: document.body.kind(),
                count: 1,
                reference: document.body.reference(),
            },
            self.locale,
        );
        let message = self.post(0, Sender::System, content, cmd.occurred_at);

        Ok(vec![
            OrderEvent::DocumentAttached(DocumentAttached {
                order_id: cmd.order_id,
                document,
                occurred_at: cmd.occurred_at,
            }),
            message,
        ])
    }
}
