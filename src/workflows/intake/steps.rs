//! Wizard path computation.
//!
//! The set of steps an applicant walks through depends on what they have
//! answered so far: specialty products splice in their own steps, physical
//! delivery drops out for service products, and post-dated-cheque credit adds
//! a deposit step. The path is recomputed from scratch on every transition so
//! an answer change earlier in the flow immediately reshapes the remainder.

use super::domain::{nested_str, str_field, FormData, Step};

/// Every wizard step in canonical order, `Completed` excluded.
pub const CANONICAL_ORDER: [Step; 13] = [
    Step::Employer,
    Step::Product,
    Step::CompanyRegistration,
    Step::LicenseCourses,
    Step::ZimparksHoliday,
    Step::CreditTerm,
    Step::CreditType,
    Step::Delivery,
    Step::DepositPayment,
    Step::Account,
    Step::Summary,
    Step::Form,
    Step::Documents,
];

/// Absolute rank of a step within the canonical order. `Completed` ranks
/// after every real step so "further along" comparisons treat it as maximal.
pub fn position(step: Step) -> usize {
    CANONICAL_ORDER
        .iter()
        .position(|candidate| *candidate == step)
        .unwrap_or(CANONICAL_ORDER.len())
}

fn business_name_is(data: &FormData, name: &str) -> bool {
    str_field(data, "business") == Some(name)
        || nested_str(data, "selectedBusiness", "name") == Some(name)
}

/// Fees-and-licensing products route through company registration details.
pub fn needs_company_registration(data: &FormData) -> bool {
    str_field(data, "subcategory") == Some("Fees and Licensing")
        || business_name_is(data, "Company Registration")
}

/// Driving-school and license-course products capture course details.
pub fn needs_license_courses(data: &FormData) -> bool {
    matches!(
        str_field(data, "subcategory"),
        Some("Driving School") | Some("License Courses")
    ) || business_name_is(data, "License Courses")
}

/// Holiday-package products capture park and travel details.
pub fn needs_zimparks_holiday(data: &FormData) -> bool {
    matches!(
        str_field(data, "category"),
        Some("Zimparks Holiday Package") | Some("Holiday Package")
    ) || str_field(data, "subcategory") == Some("Destinations")
        || business_name_is(data, "Zimparks Vacation Package")
}

fn has_specialty(data: &FormData) -> bool {
    needs_company_registration(data)
        || needs_license_courses(data)
        || needs_zimparks_holiday(data)
}

/// Whether a step belongs to the path implied by the accumulated form data.
pub fn is_applicable(step: Step, data: &FormData) -> bool {
    match step {
        Step::CompanyRegistration => needs_company_registration(data),
        Step::LicenseCourses => needs_license_courses(data),
        Step::ZimparksHoliday => needs_zimparks_holiday(data),
        // Credit term only applies to the specialty products; credit type is
        // always chosen.
        Step::CreditTerm => has_specialty(data),
        // Service products have nothing to deliver.
        Step::Delivery => !needs_license_courses(data) && !needs_zimparks_holiday(data),
        Step::DepositPayment => str_field(data, "creditType") == Some("PDC"),
        Step::Completed => false,
        _ => true,
    }
}

/// The ordered list of steps implied by the accumulated form data.
pub fn compute_steps(data: &FormData) -> Vec<Step> {
    CANONICAL_ORDER
        .iter()
        .copied()
        .filter(|step| is_applicable(*step, data))
        .collect()
}

/// The step after `current` on the computed path; `None` past the end (the
/// caller treats that as the terminal transition).
///
/// A `current` step that is no longer applicable resolves by canonical rank:
/// the next step is the first applicable step ranked strictly after it.
pub fn next_step(current: Step, data: &FormData) -> Option<Step> {
    let rank = position(current);
    compute_steps(data)
        .into_iter()
        .find(|step| position(*step) > rank)
}

/// The step before `current` on the computed path; `None` at the start.
/// From `Completed` this lands on the last wizard step.
pub fn previous_step(current: Step, data: &FormData) -> Option<Step> {
    let rank = position(current);
    compute_steps(data)
        .into_iter()
        .rev()
        .find(|step| position(*step) < rank)
}
