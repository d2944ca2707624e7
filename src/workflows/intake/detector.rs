//! Form variant detection.
//!
//! Sessions started before the form step do not declare which detailed form
//! they will fill; the variant is inferred from marker fields the channels
//! write as the applicant answers. An explicit `formId` always wins.

use super::domain::{str_field, FormData, FormVariant};

/// Seam for deciding which detailed form schema a session is headed for.
pub trait FormTypeDetector: Send + Sync {
    fn detect(&self, data: &FormData) -> FormVariant;
}

/// Marker-field detector matching the channel frontends' heuristics.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerDetector;

impl MarkerDetector {
    fn has_marker(data: &FormData, keys: &[&str]) -> bool {
        let empty = FormData::new();
        let responses = data
            .get("formResponses")
            .and_then(serde_json::Value::as_object)
            .unwrap_or(&empty);
        keys.iter()
            .any(|key| data.contains_key(*key) || responses.contains_key(*key))
    }
}

impl FormTypeDetector for MarkerDetector {
    fn detect(&self, data: &FormData) -> FormVariant {
        if let Some(form_id) = str_field(data, "formId") {
            for variant in [
                FormVariant::SalariedLoan,
                FormVariant::GovernmentPayroll,
                FormVariant::IndividualAccount,
                FormVariant::SmeBusiness,
            ] {
                if variant.form_id() == form_id {
                    return variant;
                }
            }
        }
        if Self::has_marker(data, &["responsibleMinistry", "ministry"]) {
            return FormVariant::GovernmentPayroll;
        }
        if Self::has_marker(data, &["businessName", "businessRegistrationNumber"]) {
            return FormVariant::SmeBusiness;
        }
        if Self::has_marker(data, &["accountCurrency", "serviceCenter"]) {
            return FormVariant::IndividualAccount;
        }
        FormVariant::SalariedLoan
    }
}
