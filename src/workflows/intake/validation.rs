//! Per-step form validation.
//!
//! Rules mirror what the channel frontends enforce so a record that advances
//! here is accepted downstream: Zimbabwean national ID and phone layouts,
//! salary-range dropdown values, calendar-accurate minimum age, and
//! per-form-variant required field and document lists.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use super::domain::{str_field, value_is_filled, FormData, FormVariant, Step};

pub const MINIMUM_AGE_YEARS: u32 = 18;

/// Accepted salary/revenue dropdown values across all form variants.
pub const SALARY_RANGES: [&str; 11] = [
    "10-50", "51-100", "101-200", "201-300", "300+", "100-200", "201-400", "401-600", "601-800",
    "801-1000", "1001+",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Result of validating one wizard step against accumulated form data.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<FieldError>,
    /// Field name to first error message, for direct form display.
    pub field_errors: BTreeMap<String, String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        ValidationOutcome {
            is_valid: true,
            errors: Vec::new(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn error_for(&self, field: &str) -> Option<&str> {
        self.field_errors.get(field).map(String::as_str)
    }
}

#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
}

impl Collector {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn require(&mut self, data: &FormData, field: &str, message: &str) -> bool {
        let filled = data.get(field).map(value_is_filled).unwrap_or(false);
        if !filled {
            self.push(field, message);
        }
        filled
    }

    fn check_format(
        &mut self,
        data: &FormData,
        field: &str,
        message: &str,
        rule: impl Fn(&str) -> bool,
    ) {
        if let Some(text) = text_of(data.get(field)) {
            if !text.trim().is_empty() && !rule(&text) {
                self.push(field, message);
            }
        }
    }

    fn finish(self) -> ValidationOutcome {
        let field_errors = self
            .errors
            .iter()
            .map(|error| (error.field.clone(), error.message.clone()))
            .collect();
        ValidationOutcome {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            field_errors,
        }
    }
}

/// Render a scalar JSON value as the text a format rule inspects.
fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Single `@`, non-empty local part, dotted domain, no whitespace.
pub fn email_ok(value: &str) -> bool {
    let value = value.trim();
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = value.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    let mut labels = domain.split('.');
    labels.clone().count() >= 2
        && labels.all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        })
}

/// Zimbabwe phone layout: optional `+263` or leading `0`, then 7 to 15
/// digits, spaces, dashes, or parentheses.
pub fn phone_ok(value: &str) -> bool {
    let value = value.trim();
    let rest = value
        .strip_prefix("+263")
        .or_else(|| value.strip_prefix('0'))
        .unwrap_or(value);
    let count = rest.chars().count();
    (7..=15).contains(&count)
        && rest
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, ' ' | '-' | '(' | ')'))
}

/// Zimbabwe national ID: after stripping spaces and dashes, 2 district
/// digits, a 6-7 digit registration number, a check letter, and 2 district
/// digits. The letter may be omitted only with a 7-digit registration number
/// (11 digits total), so a bare 10-digit string is rejected.
pub fn id_number_ok(value: &str) -> bool {
    let cleaned: String = value
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .collect::<String>()
        .to_ascii_uppercase();
    if !cleaned
        .chars()
        .all(|ch| ch.is_ascii_digit() || ch.is_ascii_uppercase())
    {
        return false;
    }
    let digits_only = cleaned.chars().all(|ch| ch.is_ascii_digit());
    if digits_only {
        return cleaned.len() == 11;
    }
    let letter_at = match cleaned.chars().position(|ch| ch.is_ascii_alphabetic()) {
        Some(index) => index,
        None => return false,
    };
    let head = &cleaned[..letter_at];
    let tail = &cleaned[letter_at + 1..];
    head.chars().all(|ch| ch.is_ascii_digit())
        && tail.chars().all(|ch| ch.is_ascii_digit())
        && (8..=9).contains(&head.len())
        && tail.len() == 2
}

pub fn numeric_ok(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit())
}

/// Non-negative number with at most two decimal places.
pub fn decimal_ok(value: &str) -> bool {
    let mut parts = value.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    if !numeric_ok(whole) {
        return false;
    }
    match parts.next() {
        Some(fraction) => (1..=2).contains(&fraction.len()) && numeric_ok(fraction),
        None => true,
    }
}

pub fn alpha_ok(value: &str, allow_spaces: bool) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphabetic() || (allow_spaces && ch == ' '))
}

pub fn alphanumeric_ok(value: &str, allow_spaces: bool) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || (allow_spaces && ch == ' '))
}

pub fn salary_range_ok(value: &str) -> bool {
    SALARY_RANGES.contains(&value)
}

/// Business registration numbers come in a few shapes: an uppercase
/// alphanumeric prefix over a 4-digit year (`ABC123/2023`), a plain numeric
/// prefix over a year, or a 5-20 character registry string.
pub fn business_reg_ok(value: &str) -> bool {
    if let Some((prefix, year)) = value.split_once('/') {
        let year_ok = year.len() == 4 && numeric_ok(year);
        let prefix_ok = (1..=15).contains(&prefix.len())
            && prefix
                .chars()
                .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit());
        if year_ok && prefix_ok {
            return true;
        }
    }
    (5..=20).contains(&value.len())
        && value
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || matches!(ch, '/' | '-'))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

pub fn past_date_ok(value: &str, today: NaiveDate) -> bool {
    parse_date(value).map(|date| date < today).unwrap_or(false)
}

/// Calendar-accurate age check: exactly `minimum` years old today passes,
/// one day short fails.
pub fn min_age_ok(value: &str, minimum: u32, today: NaiveDate) -> bool {
    let birth = match parse_date(value) {
        Some(date) => date,
        None => return false,
    };
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age >= minimum as i32
}

/// Validate one step against the accumulated form data.
///
/// `variant` is the detected form schema and only matters for the `form` and
/// `documents` steps; `today` anchors the date rules.
pub fn validate_step(
    step: Step,
    variant: FormVariant,
    data: &FormData,
    today: NaiveDate,
) -> ValidationOutcome {
    match step {
        Step::Employer => validate_employer(data),
        Step::Product => validate_product(data),
        Step::Account => validate_account(data),
        Step::Form => validate_form(variant, data, today),
        Step::Documents => validate_documents(variant, data),
        _ => ValidationOutcome::ok(),
    }
}

fn validate_employer(data: &FormData) -> ValidationOutcome {
    let mut collector = Collector::default();
    collector.require(data, "employer", "Please select your employer to continue");
    collector.require(data, "employerName", "Please select your employer category");
    collector.finish()
}

fn validate_product(data: &FormData) -> ValidationOutcome {
    let mut collector = Collector::default();
    let cart_mode = data
        .get("cart")
        .and_then(Value::as_array)
        .map(|items| !items.is_empty())
        .unwrap_or(false);

    collector.require(data, "category", "Please select a product category");
    if cart_mode {
        require_amount(&mut collector, data);
        return collector.finish();
    }

    collector.require(data, "subcategory", "Please select a product subcategory");
    collector.require(data, "business", "Please select a business");

    // License courses and company registration compute their amount in their
    // own specialty step, so scale and amount are not asked here.
    let amount_deferred =
        super::steps::needs_license_courses(data) || super::steps::needs_company_registration(data);
    if !amount_deferred {
        collector.require(data, "scale", "Please select a scale");
        require_amount(&mut collector, data);
    }
    collector.finish()
}

fn require_amount(collector: &mut Collector, data: &FormData) {
    if !collector.require(data, "amount", "Please enter an amount") {
        return;
    }
    let positive = match data.get("amount") {
        Some(Value::Number(number)) => number.as_f64().map(|n| n >= 1.0).unwrap_or(false),
        Some(Value::String(text)) => text.trim().parse::<f64>().map(|n| n >= 1.0).unwrap_or(false),
        _ => false,
    };
    if !positive {
        collector.push("amount", "Amount must be greater than 0");
    }
}

fn validate_account(data: &FormData) -> ValidationOutcome {
    let mut collector = Collector::default();
    let has_account = data.get("hasAccount");
    let wants_account = data.get("wantsAccount");
    if has_account.is_none() && wants_account.is_none() {
        collector.push("hasAccount", "Please indicate whether you have an account");
    }
    let affirmative = has_account.and_then(Value::as_bool) == Some(true)
        || wants_account.and_then(Value::as_bool) == Some(true);
    if affirmative && !data.get("accountType").map(value_is_filled).unwrap_or(false) {
        collector.push("accountType", "Please select your account type");
    }
    collector.finish()
}

fn validate_form(variant: FormVariant, data: &FormData, today: NaiveDate) -> ValidationOutcome {
    let empty = FormData::new();
    let responses = data
        .get("formResponses")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let mut collector = Collector::default();

    collect_common_fields(&mut collector, responses, today);
    match variant {
        FormVariant::SalariedLoan => collect_salaried_loan(&mut collector, responses),
        FormVariant::GovernmentPayroll => collect_government_payroll(&mut collector, responses),
        FormVariant::IndividualAccount => collect_individual_account(&mut collector, responses),
        FormVariant::SmeBusiness => collect_sme_business(&mut collector, responses),
    }
    collector.finish()
}

fn collect_common_fields(collector: &mut Collector, responses: &FormData, today: NaiveDate) {
    if collector.require(responses, "firstName", "First Name is required") {
        collector.check_format(responses, "firstName", "First Name must contain only letters", |v| {
            alpha_ok(v, true)
        });
    }
    if collector.require(responses, "surname", "Surname is required") {
        collector.check_format(responses, "surname", "Surname must contain only letters", |v| {
            alpha_ok(v, true)
        });
    }
    if collector.require(responses, "dateOfBirth", "Date of birth is required") {
        collector.check_format(
            responses,
            "dateOfBirth",
            "Date of birth must be in the past",
            |v| past_date_ok(v, today),
        );
        collector.check_format(
            responses,
            "dateOfBirth",
            "You must be at least 18 years old",
            |v| min_age_ok(v, MINIMUM_AGE_YEARS, today),
        );
    }
    collector.require(responses, "gender", "Gender is required");
    if collector.require(responses, "nationalIdNumber", "National ID number is required") {
        collector.check_format(
            responses,
            "nationalIdNumber",
            "Please enter a valid ID number format (e.g., 12-345678-A-90)",
            id_number_ok,
        );
    }
    if collector.require(responses, "mobile", "Mobile number is required") {
        collector.check_format(
            responses,
            "mobile",
            "Please enter a valid mobile number (e.g., 0771234567 or +263771234567)",
            phone_ok,
        );
    }
    // Email stays optional but is format-checked when present.
    collector.check_format(
        responses,
        "emailAddress",
        "Please enter a valid email address",
        email_ok,
    );
}

fn collect_salaried_loan(collector: &mut Collector, responses: &FormData) {
    collector.require(responses, "employerName", "Employer name is required");
    if collector.require(responses, "currentNetSalary", "Current net salary is required") {
        collector.check_format(
            responses,
            "currentNetSalary",
            "Please select a valid salary range",
            salary_range_ok,
        );
    }
    collector.require(responses, "jobTitle", "Job title is required");
    collector.require(responses, "employerAddress", "Employer address is required");
    collector.require(responses, "dateOfEmployment", "Date of employment is required");
    collect_loan_fields(collector, responses);
    collector.require(responses, "purposeOfLoan", "Purpose of loan is required");
    collect_next_of_kin(collector, responses, true);
}

fn collect_government_payroll(collector: &mut Collector, responses: &FormData) {
    if collector.require(responses, "employeeNumber", "Employee number is required") {
        collector.check_format(
            responses,
            "employeeNumber",
            "Employee number must contain only letters and numbers",
            |v| alphanumeric_ok(v, false),
        );
    }
    collector.require(responses, "ministry", "Ministry is required");
    if collector.require(responses, "netSalary", "Net salary is required") {
        collector.check_format(
            responses,
            "netSalary",
            "Please select a valid salary range",
            salary_range_ok,
        );
    }
    collector.require(responses, "responsiblePaymaster", "Responsible paymaster is required");
    collector.require(responses, "responsibleMinistry", "Responsible ministry is required");
    collect_loan_fields(collector, responses);
}

fn collect_loan_fields(collector: &mut Collector, responses: &FormData) {
    if collector.require(responses, "loanAmount", "Loan amount is required") {
        collector.check_format(
            responses,
            "loanAmount",
            "Please enter a valid loan amount",
            decimal_ok,
        );
    }
    if collector.require(responses, "loanTenure", "Loan tenure is required") {
        collector.check_format(
            responses,
            "loanTenure",
            "Please enter a valid loan tenure",
            numeric_ok,
        );
    }
}

fn collect_individual_account(collector: &mut Collector, responses: &FormData) {
    collector.require(responses, "residentialAddress", "Residential address is required");
    collector.require(responses, "maritalStatus", "Marital status is required");
    collector.require(responses, "nationality", "Nationality is required");
    collector.require(responses, "countryOfResidence", "Country of residence is required");
    collector.require(responses, "accountCurrency", "Account currency is required");
    collector.require(responses, "serviceCenter", "Service center is required");
    if collector.require(responses, "grossMonthlySalary", "Monthly salary is required") {
        collector.check_format(
            responses,
            "grossMonthlySalary",
            "Please select a valid salary range",
            salary_range_ok,
        );
    }
    collect_next_of_kin(collector, responses, false);
    let acknowledged = responses
        .get("declaration")
        .and_then(Value::as_object)
        .and_then(|declaration| declaration.get("acknowledged"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !acknowledged {
        collector.push("declaration.acknowledged", "You must acknowledge the declaration");
    }
}

fn collect_sme_business(collector: &mut Collector, responses: &FormData) {
    collector.require(responses, "businessName", "Business name is required");
    if collector.require(
        responses,
        "businessRegistrationNumber",
        "Business registration number is required",
    ) {
        collector.check_format(
            responses,
            "businessRegistrationNumber",
            "Please enter a valid business registration number format (e.g., ABC123/2023)",
            business_reg_ok,
        );
    }
    collector.require(responses, "businessType", "Business type is required");
    collector.require(responses, "businessAddress", "Business address is required");
    if collector.require(responses, "businessPhone", "Business phone is required") {
        collector.check_format(
            responses,
            "businessPhone",
            "Please enter a valid phone number (e.g., 0771234567 or +263771234567)",
            phone_ok,
        );
    }
    collector.check_format(
        responses,
        "businessEmail",
        "Please enter a valid email address",
        email_ok,
    );
    collector.require(responses, "businessIndustry", "Business industry is required");
    if collector.require(responses, "businessYearsOperating", "Years operating is required") {
        collector.check_format(
            responses,
            "businessYearsOperating",
            "Please enter a valid number of years",
            numeric_ok,
        );
    }
    if collector.require(responses, "businessAnnualRevenue", "Annual revenue is required") {
        collector.check_format(
            responses,
            "businessAnnualRevenue",
            "Please select a valid revenue range",
            salary_range_ok,
        );
    }
    if collector.require(responses, "netProfit", "Net profit is required") {
        collector.check_format(
            responses,
            "netProfit",
            "Please select a valid profit range",
            salary_range_ok,
        );
    }

    let directors = responses
        .get("directorsPersonalDetails")
        .and_then(Value::as_object);
    for (inner, label, rule) in [
        ("firstName", "Director's first name", Rule::Alpha),
        ("surname", "Director's surname", Rule::Alpha),
        ("idNumber", "Director's ID number", Rule::IdNumber),
    ] {
        let field = format!("directorsPersonalDetails.{inner}");
        let value = directors
            .and_then(|details| details.get(inner))
            .and_then(Value::as_str)
            .unwrap_or("");
        if value.trim().is_empty() {
            collector.push(&field, format!("{label} is required"));
        } else {
            let valid = match rule {
                Rule::Alpha => alpha_ok(value, true),
                Rule::IdNumber => id_number_ok(value),
            };
            if !valid {
                let detail = match rule {
                    Rule::Alpha => format!("{label} must contain only letters"),
                    Rule::IdNumber => {
                        "Please enter a valid ID number format (e.g., 12-345678-A-90)".to_string()
                    }
                };
                collector.push(&field, detail);
            }
        }
    }

    collect_first_contact(
        collector,
        responses,
        "references",
        "At least one reference is required",
        "Phone number is required for reference",
        "Please enter a valid phone number for reference",
        "name",
    );
}

enum Rule {
    Alpha,
    IdNumber,
}

fn collect_next_of_kin(collector: &mut Collector, responses: &FormData, require_contact: bool) {
    let first = responses
        .get("spouseDetails")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(Value::as_object);
    let named = first
        .and_then(|entry| entry.get("fullName"))
        .map(value_is_filled)
        .unwrap_or(false);
    if !named {
        collector.push("spouseDetails[0].fullName", "At least one next of kin is required");
        return;
    }
    if !require_contact {
        return;
    }
    let entry = match first {
        Some(entry) => entry,
        None => return,
    };
    if !entry
        .get("relationship")
        .map(value_is_filled)
        .unwrap_or(false)
    {
        collector.push(
            "spouseDetails[0].relationship",
            "Relationship is required for next of kin",
        );
    }
    match entry.get("phoneNumber").and_then(Value::as_str) {
        None => collector.push(
            "spouseDetails[0].phoneNumber",
            "Phone number is required for next of kin",
        ),
        Some(phone) if phone.trim().is_empty() => collector.push(
            "spouseDetails[0].phoneNumber",
            "Phone number is required for next of kin",
        ),
        Some(phone) if !phone_ok(phone) => collector.push(
            "spouseDetails[0].phoneNumber",
            "Please enter a valid phone number for next of kin",
        ),
        Some(_) => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn collect_first_contact(
    collector: &mut Collector,
    responses: &FormData,
    key: &str,
    missing_message: &str,
    missing_phone_message: &str,
    invalid_phone_message: &str,
    name_key: &str,
) {
    let first = responses
        .get(key)
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(Value::as_object);
    let named = first
        .and_then(|entry| entry.get(name_key))
        .map(value_is_filled)
        .unwrap_or(false);
    if !named {
        collector.push(&format!("{key}[0].{name_key}"), missing_message);
        return;
    }
    let entry = match first {
        Some(entry) => entry,
        None => return,
    };
    match entry.get("phoneNumber").and_then(Value::as_str) {
        None => collector.push(&format!("{key}[0].phoneNumber"), missing_phone_message),
        Some(phone) if phone.trim().is_empty() => {
            collector.push(&format!("{key}[0].phoneNumber"), missing_phone_message)
        }
        Some(phone) if !phone_ok(phone) => {
            collector.push(&format!("{key}[0].phoneNumber"), invalid_phone_message)
        }
        Some(_) => {}
    }
}

/// Document types every application must carry, regardless of variant.
pub const ALWAYS_REQUIRED_DOCUMENTS: [&str; 1] = ["national_id"];

/// Variant-specific required document types.
pub fn required_documents(variant: FormVariant, data: &FormData) -> Vec<&'static str> {
    let mut required: Vec<&'static str> = ALWAYS_REQUIRED_DOCUMENTS.to_vec();
    match variant {
        FormVariant::SalariedLoan => required.extend(["payslip", "bank_statement"]),
        FormVariant::GovernmentPayroll => required.push("payslip"),
        FormVariant::IndividualAccount => required.push("passport_photo"),
        FormVariant::SmeBusiness => {
            required.extend(["business_registration", "financial_statements", "director_id"])
        }
    }
    if str_field(data, "employer") == Some("entrepreneur") {
        required.push("business_license");
    }
    required
}

fn validate_documents(variant: FormVariant, data: &FormData) -> ValidationOutcome {
    let mut collector = Collector::default();
    let documents = match data.get("documents").and_then(Value::as_object) {
        Some(documents) => documents,
        None => {
            collector.push("documents", "No documents uploaded");
            return collector.finish();
        }
    };

    if !documents.get("selfie").map(value_is_filled).unwrap_or(false) {
        collector.push("selfie", "Selfie photo is required");
    }
    if !documents
        .get("signature")
        .map(value_is_filled)
        .unwrap_or(false)
    {
        collector.push("signature", "Digital signature is required");
    }

    let uploaded = documents
        .get("uploadedDocuments")
        .and_then(Value::as_object);
    for doc_type in required_documents(variant, data) {
        let present = uploaded
            .and_then(|docs| docs.get(doc_type))
            .and_then(Value::as_array)
            .map(|entries| !entries.is_empty())
            .unwrap_or(false);
        if !present {
            collector.push(doc_type, format!("{} is required", document_label(doc_type)));
        }
    }
    collector.finish()
}

fn document_label(doc_type: &str) -> String {
    doc_type
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
