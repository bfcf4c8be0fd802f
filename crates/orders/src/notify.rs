//! System message bodies for order notifications.

use std::collections::BTreeSet;

use crate::display::{Label, Locale};
use crate::documents::{DocumentKind, RequiredDocument};
use crate::order::OrderStatus;

/// Something the client should be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice<'a> {
    OrderReceived,
    /// A lifecycle transition landed in `to`. A change to `PendingReview`
    /// is a reopen.
    StatusChanged {
        to: OrderStatus,
        reason: Option<&'a str>,
        documents: &'a BTreeSet<RequiredDocument>,
    },
    DocumentsAdded {
        kind: DocumentKind,
        count: usize,
        reference: Option<&'a str>,
    },
    AutoReply,
}

fn noun(kind: DocumentKind, count: usize) -> &'static str {
    let plural = count != 1;
    match (kind, plural) {
        (DocumentKind::Policy, false) => "policy",
        (DocumentKind::Policy, true) => "policies",
        (DocumentKind::CustomsDeclaration, false) => "customs declaration",
        (DocumentKind::CustomsDeclaration, true) => "customs declarations",
        (DocumentKind::TaxSlip, false) => "tax slip",
        (DocumentKind::TaxSlip, true) => "tax slips",
        (DocumentKind::PurchaseInvoice, false) => "purchase invoice",
        (DocumentKind::PurchaseInvoice, true) => "purchase invoices",
        (DocumentKind::TransportLeg, false) => "transport leg",
        (DocumentKind::TransportLeg, true) => "transport legs",
    }
}

fn document_list(documents: &BTreeSet<RequiredDocument>, locale: Locale) -> String {
    let separator = match locale {
        Locale::En => ", ",
        Locale::Ar => "، ",
    };
    documents
        .iter()
        .map(|d| d.label(locale))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Render `notice` as a system message body.
pub fn compose(notice: &Notice<'_>, locale: Locale) -> String {
    match (notice, locale) {
        (Notice::OrderReceived, Locale::En) => {
            "Your order has been received and is pending review.".to_string()
        }
        (Notice::OrderReceived, Locale::Ar) => "تم استلام طلبك وهو قيد المراجعة.".to_string(),

        (Notice::StatusChanged { to, reason, documents }, _) => {
            status_changed(*to, reason.unwrap_or_default(), documents, locale)
        }

        (Notice::DocumentsAdded { kind, count, reference }, Locale::En) => {
            let mut body = format!("{count} new {} added", noun(*kind, *count));
            if let Some(reference) = reference {
                body.push_str(&format!(" ({reference})"));
            }
            body
        }
        (Notice::DocumentsAdded { kind, count, reference }, Locale::Ar) => {
            let mut body = format!("تمت إضافة {count} {} جديد", kind.label(locale));
            if let Some(reference) = reference {
                body.push_str(&format!(" ({reference})"));
            }
            body
        }

        (Notice::AutoReply, Locale::En) => "Thank you for contacting us. A customer service \
             representative will reply to you shortly."
            .to_string(),
        (Notice::AutoReply, Locale::Ar) => {
            "شكراً لتواصلك معنا. سيقوم أحد ممثلي خدمة العملاء بالرد عليك قريباً.".to_string()
        }
    }
}

fn status_changed(
    to: OrderStatus,
    reason: &str,
    documents: &BTreeSet<RequiredDocument>,
    locale: Locale,
) -> String {
    match (to, locale) {
        (OrderStatus::Approved, Locale::En) => {
            "Your order has been approved and is being processed.".to_string()
        }
        (OrderStatus::Approved, Locale::Ar) => "تمت الموافقة على طلبك وجاري العمل عليه.".to_string(),
        (OrderStatus::Rejected, Locale::En) => {
            format!("Your order has been rejected. Reason: {reason}")
        }
        (OrderStatus::Rejected, Locale::Ar) => format!("تم رفض طلبك. السبب: {reason}"),
        (OrderStatus::AwaitingAdditionalDocuments, Locale::En) => format!(
            "Additional documents are required: {}.",
            document_list(documents, locale)
        ),
        (OrderStatus::AwaitingAdditionalDocuments, Locale::Ar) => format!(
            "يرجى تقديم المستندات الإضافية التالية: {}",
            document_list(documents, locale)
        ),
        (OrderStatus::PendingReview, Locale::En) => {
            "Your order has been reopened and is pending review.".to_string()
        }
        (OrderStatus::PendingReview, Locale::Ar) => {
            "تمت إعادة فتح طلبك وهو قيد المراجعة.".to_string()
        }
        (OrderStatus::InProgress, Locale::En) => "Work on your order is in progress.".to_string(),
        (OrderStatus::InProgress, Locale::Ar) => "طلبك قيد التنفيذ.".to_string(),
        (OrderStatus::Completed, Locale::En) => "Your order has been completed.".to_string(),
        (OrderStatus::Completed, Locale::Ar) => "تم إكمال طلبك.".to_string(),
    }
}
