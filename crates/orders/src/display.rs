//! Localised display labels for the closed enums.
//!
//! Labels are for presentation only. Control flow always matches on the
//! enums themselves.

use serde::{Deserialize, Serialize};

use brokerdesk_core::DomainError;

use crate::documents::{DocumentKind, PaymentStatus, RequiredDocument};
use crate::order::{OrderStatus, ServiceKind};
use crate::tracking::CheckpointKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

impl core::str::FromStr for Locale {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "ar" => Ok(Locale::Ar),
            other => Err(DomainError::invalid_argument(format!("unsupported locale: {other}"))),
        }
    }
}

/// Display label in a given locale.
pub trait Label {
    fn label(&self, locale: Locale) -> &'static str;
}

impl Label for OrderStatus {
    fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (OrderStatus::PendingReview, Locale::En) => "Pending review",
            (OrderStatus::PendingReview, Locale::Ar) => "قيد المراجعة",
            (OrderStatus::Approved, Locale::En) => "Approved",
            (OrderStatus::Approved, Locale::Ar) => "موافق عليه",
            (OrderStatus::Rejected, Locale::En) => "Rejected",
            (OrderStatus::Rejected, Locale::Ar) => "مرفوض",
            (OrderStatus::AwaitingAdditionalDocuments, Locale::En) => {
                "Awaiting additional documents"
            }
            (OrderStatus::AwaitingAdditionalDocuments, Locale::Ar) => "بانتظار مستندات إضافية",
            (OrderStatus::InProgress, Locale::En) => "In progress",
            (OrderStatus::InProgress, Locale::Ar) => "قيد التنفيذ",
            (OrderStatus::Completed, Locale::En) => "Completed",
            (OrderStatus::Completed, Locale::Ar) => "مكتمل",
        }
    }
}

impl Label for ServiceKind {
    fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (ServiceKind::Import, Locale::En) => "Import clearance",
            (ServiceKind::Import, Locale::Ar) => "تخليص وارد",
            (ServiceKind::Export, Locale::En) => "Export clearance",
            (ServiceKind::Export, Locale::Ar) => "تخليص صادر",
            (ServiceKind::Shipping, Locale::En) => "Shipping",
            (ServiceKind::Shipping, Locale::Ar) => "شحن",
            (ServiceKind::Transport, Locale::En) => "Transport",
            (ServiceKind::Transport, Locale::Ar) => "نقل",
            (ServiceKind::Storage, Locale::En) => "Storage",
            (ServiceKind::Storage, Locale::Ar) => "تخزين",
        }
    }
}

impl Label for PaymentStatus {
    fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (PaymentStatus::Unpaid, Locale::En) => "Unpaid",
            (PaymentStatus::Unpaid, Locale::Ar) => "غير مسدد",
            (PaymentStatus::Paid, Locale::En) => "Paid",
            (PaymentStatus::Paid, Locale::Ar) => "مسدد",
            (PaymentStatus::Partial, Locale::En) => "Partially paid",
            (PaymentStatus::Partial, Locale::Ar) => "مسدد جزئياً",
        }
    }
}

impl Label for DocumentKind {
    fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (DocumentKind::Policy, Locale::En) => "Policy",
            (DocumentKind::Policy, Locale::Ar) => "بوليصة",
            (DocumentKind::CustomsDeclaration, Locale::En) => "Customs declaration",
            (DocumentKind::CustomsDeclaration, Locale::Ar) => "بيان جمركي",
            (DocumentKind::TaxSlip, Locale::En) => "Tax slip",
            (DocumentKind::TaxSlip, Locale::Ar) => "إيصال سداد",
            (DocumentKind::PurchaseInvoice, Locale::En) => "Purchase invoice",
            (DocumentKind::PurchaseInvoice, Locale::Ar) => "فاتورة شراء",
            (DocumentKind::TransportLeg, Locale::En) => "Transport leg",
            (DocumentKind::TransportLeg, Locale::Ar) => "رحلة نقل",
        }
    }
}

impl Label for RequiredDocument {
    fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (RequiredDocument::CertificateOfOrigin, Locale::En) => "Certificate of origin",
            (RequiredDocument::CertificateOfOrigin, Locale::Ar) => "شهادة المنشأ",
            (RequiredDocument::CertificateOfConformity, Locale::En) => "Certificate of conformity",
            (RequiredDocument::CertificateOfConformity, Locale::Ar) => "شهادة المطابقة",
            (RequiredDocument::HealthCertificate, Locale::En) => "Health certificate",
            (RequiredDocument::HealthCertificate, Locale::Ar) => "شهادة صحية",
            (RequiredDocument::AuthorizationLetter, Locale::En) => "Authorization letter",
            (RequiredDocument::AuthorizationLetter, Locale::Ar) => "خطاب تفويض",
            (RequiredDocument::BillOfLading, Locale::En) => "Bill of lading",
            (RequiredDocument::BillOfLading, Locale::Ar) => "بوليصة الشحن",
            (RequiredDocument::PurchaseInvoice, Locale::En) => "Purchase invoice",
            (RequiredDocument::PurchaseInvoice, Locale::Ar) => "فاتورة الشراء",
        }
    }
}

impl Label for CheckpointKind {
    fn label(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (CheckpointKind::Received, Locale::En) => "Order received",
            (CheckpointKind::Received, Locale::Ar) => "تم استلام الطلب",
            (CheckpointKind::ApprovedForProcessing, Locale::En) => "Order approved",
            (CheckpointKind::ApprovedForProcessing, Locale::Ar) => "تمت الموافقة على الطلب",
            (CheckpointKind::ShipmentPackaging, Locale::En) => "Preparing shipment",
            (CheckpointKind::ShipmentPackaging, Locale::Ar) => "جاري تجهيز الشحنة",
            (CheckpointKind::CustomsClearance, Locale::En) => "Customs clearance in progress",
            (CheckpointKind::CustomsClearance, Locale::Ar) => "جاري إجراءات التخليص",
            (CheckpointKind::TransportPreparation, Locale::En) => "Preparing transport",
            (CheckpointKind::TransportPreparation, Locale::Ar) => "جاري تجهيز النقل",
            (CheckpointKind::FinalCompletion, Locale::En) => "Order completed",
            (CheckpointKind::FinalCompletion, Locale::Ar) => "اكتمال الطلب",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn status_labels_are_distinct_per_locale() {
        for locale in [Locale::En, Locale::Ar] {
            let labels: HashSet<_> = OrderStatus::ALL.iter().map(|s| s.label(locale)).collect();
            assert_eq!(labels.len(), OrderStatus::ALL.len());
        }
    }

    #[test]
    fn arabic_status_labels_match_the_client_portal() {
        assert_eq!(OrderStatus::PendingReview.label(Locale::Ar), "قيد المراجعة");
        assert_eq!(
            OrderStatus::AwaitingAdditionalDocuments.label(Locale::Ar),
            "بانتظار مستندات إضافية"
        );
    }

    #[test]
    fn locale_parses_case_insensitively() {
        assert_eq!("AR".parse::<Locale>(), Ok(Locale::Ar));
        assert_eq!(" en ".parse::<Locale>(), Ok(Locale::En));
        assert!("fr".parse::<Locale>().is_err());
    }
}
