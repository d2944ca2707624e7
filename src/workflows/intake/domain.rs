use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Form data is an ordered map of field name to JSON value; the schema varies
/// by applicant type and channel, so the core treats it as a document and only
/// interprets the keys it owns.
pub type FormData = Map<String, Value>;

/// Metadata key stamped on both records of a synchronized pair.
pub const META_LAST_SYNC: &str = "last_sync";
/// Metadata key recording which channel won the merge.
pub const META_SYNC_SOURCE: &str = "sync_source";
/// Metadata key pointing at the session a record was merged from.
pub const META_MERGED_FROM: &str = "merged_from";
/// Metadata key on a whatsapp state created by a web platform switch.
pub const META_CREATED_FROM_WEB: &str = "created_from_web";
/// Metadata key on a web state created by a whatsapp platform switch.
pub const META_CREATED_FROM_WHATSAPP: &str = "created_from_whatsapp";
/// Metadata key recording when a platform switch happened.
pub const META_PLATFORM_SWITCH_TIME: &str = "platform_switch_time";
/// Metadata key holding the digits-only phone a whatsapp session is keyed by.
pub const META_PHONE_NUMBER: &str = "phone_number";
/// Metadata key holding the current application status label.
pub const META_STATUS: &str = "status";
/// Metadata key holding the append-only status history array.
pub const META_STATUS_HISTORY: &str = "status_history";
/// Metadata key mapping top-level form-data keys to their last write time.
///
/// Stamped by the wizard controller on every advance; the synchronization
/// engine uses it for per-field merge precedence.
pub const META_FIELD_UPDATED_AT: &str = "field_updated_at";

/// The medium an applicant is interacting through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    Whatsapp,
    Admin,
}

impl Channel {
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Whatsapp => "whatsapp",
            Channel::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One stage of the application wizard.
///
/// `Completed` is the terminal marker and never appears in a computed step
/// list; every other variant is conditionally a member depending on
/// accumulated form data (see [`super::steps`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Employer,
    Product,
    CompanyRegistration,
    LicenseCourses,
    ZimparksHoliday,
    CreditTerm,
    CreditType,
    Delivery,
    DepositPayment,
    Account,
    Summary,
    Form,
    Documents,
    Completed,
}

impl Step {
    pub fn label(&self) -> &'static str {
        match self {
            Step::Employer => "employer",
            Step::Product => "product",
            Step::CompanyRegistration => "companyRegistration",
            Step::LicenseCourses => "licenseCourses",
            Step::ZimparksHoliday => "zimparksHoliday",
            Step::CreditTerm => "creditTerm",
            Step::CreditType => "creditType",
            Step::Delivery => "delivery",
            Step::DepositPayment => "depositPayment",
            Step::Account => "account",
            Step::Summary => "summary",
            Step::Form => "form",
            Step::Documents => "documents",
            Step::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One of the fixed detailed application form schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormVariant {
    /// Salaried-employee loan for existing account holders.
    SalariedLoan,
    /// Government-payroll (salary service bureau) loan.
    GovernmentPayroll,
    /// Individual bank-account opening.
    IndividualAccount,
    /// SME business-account opening.
    SmeBusiness,
}

impl FormVariant {
    /// Wire identifier carried in `formData.formId`.
    pub fn form_id(&self) -> &'static str {
        match self {
            FormVariant::SalariedLoan => "account_holder_loan_application.json",
            FormVariant::GovernmentPayroll => "ssb_account_opening_form.json",
            FormVariant::IndividualAccount => "individual_account_opening.json",
            FormVariant::SmeBusiness => "smes_business_account_opening.json",
        }
    }
}

/// Durable record of an applicant's progress on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationState {
    pub session_id: String,
    pub channel: Channel,
    pub user_identifier: String,
    pub current_step: Step,
    pub form_data: FormData,
    pub metadata: FormData,
    pub reference_code: Option<String>,
    pub reference_code_expires_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// Optimistic-concurrency token; bumped by every successful store update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationState {
    /// Expired states are invalid for resumption and lookup.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True when the state carries a reference code that is still valid.
    pub fn reference_code_active(&self, now: DateTime<Utc>) -> bool {
        match (&self.reference_code, self.reference_code_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Payload for creating a fresh state record.
#[derive(Debug, Clone)]
pub struct NewState {
    pub session_id: String,
    pub channel: Channel,
    pub user_identifier: String,
    pub current_step: Step,
    pub form_data: FormData,
    pub metadata: FormData,
    pub expires_at: DateTime<Utc>,
    pub reference_code: Option<String>,
    pub reference_code_expires_at: Option<DateTime<Utc>>,
}

/// Partial update merged into an existing record; absent fields are left
/// untouched, `form_data`/`metadata` patches are shallow merges at the top
/// level.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub current_step: Option<Step>,
    pub form_data: Option<FormData>,
    pub metadata: Option<FormData>,
    pub reference_code: Option<String>,
    pub reference_code_expires_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StatePatch {
    pub fn step(step: Step) -> Self {
        StatePatch {
            current_step: Some(step),
            ..StatePatch::default()
        }
    }
}

/// How long a fresh session stays live on each channel. WhatsApp applicants
/// return over days, so those sessions outlast web ones.
#[derive(Debug, Clone, Copy)]
pub struct SessionLifetimes {
    pub web_hours: i64,
    pub whatsapp_days: i64,
}

impl Default for SessionLifetimes {
    fn default() -> Self {
        SessionLifetimes {
            web_hours: 24,
            whatsapp_days: 7,
        }
    }
}

impl SessionLifetimes {
    pub fn expiry_for(&self, channel: Channel, now: DateTime<Utc>) -> DateTime<Utc> {
        match channel {
            Channel::Whatsapp => now + chrono::Duration::days(self.whatsapp_days),
            Channel::Web | Channel::Admin => now + chrono::Duration::hours(self.web_hours),
        }
    }
}

/// Mint a new session identifier for a channel.
pub fn new_session_id(channel: Channel) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    format!("{}_{}", channel.label(), suffix)
}

/// A JSON value counts as filled when it carries actual content: non-blank
/// string, non-empty array/object, or any number/boolean.
pub fn value_is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Fetch a top-level string field.
pub fn str_field<'a>(data: &'a FormData, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

/// Fetch a string field nested one object deep, e.g. `selectedBusiness.name`.
pub fn nested_str<'a>(data: &'a FormData, key: &str, inner: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_object)
        .and_then(|object| object.get(inner))
        .and_then(Value::as_str)
}
