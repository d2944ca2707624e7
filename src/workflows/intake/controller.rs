//! Wizard step controller.
//!
//! Owns the transition protocol: validate the current step against the
//! accumulated data, recompute the applicable path, and commit step, data,
//! and per-field write stamps in a single version-checked update. The
//! terminal transition finalizes the reference code and hands the finished
//! application to the submission sink.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

use super::codes::{CodeError, ReferenceCodeService};
use super::detector::FormTypeDetector;
use super::domain::{
    new_session_id, ApplicationState, Channel, FormData, FormVariant, NewState, SessionLifetimes,
    StatePatch, Step, META_FIELD_UPDATED_AT, META_STATUS, META_STATUS_HISTORY,
};
use super::steps::{next_step, previous_step};
use super::store::{StateStore, StoreError};
use super::validation::{validate_step, ValidationOutcome};

pub const STATUS_SUBMITTED: &str = "submitted";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("session not found")]
    SessionNotFound,
    #[error("an active session already exists for this applicant")]
    DuplicateSession,
    #[error("state was modified concurrently, reload and retry")]
    ConcurrentModification,
    #[error(transparent)]
    Code(CodeError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ControllerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => ControllerError::SessionNotFound,
            StoreError::DuplicateSession => ControllerError::DuplicateSession,
            StoreError::VersionConflict => ControllerError::ConcurrentModification,
            other => ControllerError::Store(other),
        }
    }
}

impl From<CodeError> for ControllerError {
    fn from(error: CodeError) -> Self {
        match error {
            CodeError::Store(store) => ControllerError::from(store),
            other => ControllerError::Code(other),
        }
    }
}

#[derive(Debug, Error)]
#[error("submission rejected: {0}")]
pub struct SubmissionError(pub String);

/// A finished application handed to the downstream intake pipeline.
#[derive(Debug, Clone)]
pub struct CompletedSubmission {
    pub session_id: String,
    pub channel: Channel,
    pub variant: FormVariant,
    pub reference_code: String,
    pub form_data: FormData,
}

/// Outbound seam for completed applications (PDF generation, scoring, CRM —
/// all outside this crate). Failures are reported back but a terminal
/// transition never rolls back on a sink error.
pub trait SubmissionSink: Send + Sync {
    fn submit(&self, submission: CompletedSubmission) -> Result<String, SubmissionError>;
}

/// Default sink: log the completed application and acknowledge it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SubmissionSink for TracingSink {
    fn submit(&self, submission: CompletedSubmission) -> Result<String, SubmissionError> {
        tracing::info!(
            session_id = submission.session_id,
            channel = %submission.channel,
            form_id = submission.variant.form_id(),
            reference_code = submission.reference_code,
            fields = submission.form_data.len(),
            "application submitted"
        );
        Ok(format!("submission-{}", submission.session_id))
    }
}

#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub state: ApplicationState,
    pub resumed: bool,
}

#[derive(Debug)]
pub enum AdvanceOutcome {
    Advanced(ApplicationState),
    Completed {
        state: ApplicationState,
        reference_code: String,
    },
    Rejected(ValidationOutcome),
}

pub struct WizardController<S, D, K> {
    store: Arc<S>,
    detector: Arc<D>,
    sink: Arc<K>,
    codes: Arc<ReferenceCodeService<S>>,
    lifetimes: SessionLifetimes,
}

impl<S, D, K> WizardController<S, D, K>
where
    S: StateStore,
    D: FormTypeDetector,
    K: SubmissionSink,
{
    pub fn new(
        store: Arc<S>,
        detector: Arc<D>,
        sink: Arc<K>,
        codes: Arc<ReferenceCodeService<S>>,
        lifetimes: SessionLifetimes,
    ) -> Self {
        Self {
            store,
            detector,
            sink,
            codes,
            lifetimes,
        }
    }

    /// Begin a session, or resume the applicant's live one when `resume` is
    /// set and a matching session exists. Starting over an identified
    /// applicant's live session without `resume` is a conflict.
    pub fn start(
        &self,
        channel: Channel,
        user_identifier: Option<&str>,
        form_data: FormData,
        resume: bool,
    ) -> Result<StartOutcome, ControllerError> {
        if let Some(user) = user_identifier {
            if let Some(existing) = self.store.find_active_by_user(channel, user)? {
                if !resume {
                    return Err(ControllerError::DuplicateSession);
                }
                tracing::info!(
                    session_id = existing.session_id,
                    channel = %channel,
                    "resumed existing session"
                );
                return Ok(StartOutcome {
                    state: existing,
                    resumed: true,
                });
            }
        }

        let now = Utc::now();
        let session_id = new_session_id(channel);
        // Web applicants are anonymous until the form step, so the session
        // id doubles as their identifier.
        let user_identifier = user_identifier
            .map(str::to_string)
            .unwrap_or_else(|| session_id.clone());
        let mut metadata = FormData::new();
        if !form_data.is_empty() {
            metadata.insert(
                META_FIELD_UPDATED_AT.to_string(),
                Value::Object(stamps_for(&form_data, now)),
            );
        }
        let state = self.store.create(NewState {
            session_id,
            channel,
            user_identifier,
            current_step: Step::Employer,
            form_data,
            metadata,
            expires_at: self.lifetimes.expiry_for(channel, now),
            reference_code: None,
            reference_code_expires_at: None,
        })?;
        tracing::info!(session_id = state.session_id, channel = %channel, "session started");
        Ok(StartOutcome {
            state,
            resumed: false,
        })
    }

    pub fn get(&self, session_id: &str) -> Result<ApplicationState, ControllerError> {
        self.store
            .get(session_id)?
            .ok_or(ControllerError::SessionNotFound)
    }

    /// Validate the current step against the data submitted for it and move
    /// to the next applicable step, or complete the application when the
    /// path is exhausted.
    pub fn advance(
        &self,
        session_id: &str,
        step_data: FormData,
    ) -> Result<AdvanceOutcome, ControllerError> {
        let state = self.get(session_id)?;
        // A replayed call on a finished application (client retry after a
        // timeout, double tap) returns the committed outcome without touching
        // the sink or the status history again.
        if state.current_step == Step::Completed {
            let reference_code = self.codes.generate(session_id)?;
            tracing::info!(session_id, "advance on a completed application, returning as-is");
            return Ok(AdvanceOutcome::Completed {
                state,
                reference_code,
            });
        }
        let now = Utc::now();

        // Validation sees the merged view so a step can rely on earlier
        // answers.
        let mut merged = state.form_data.clone();
        for (key, value) in &step_data {
            merged.insert(key.clone(), value.clone());
        }
        let variant = self.detector.detect(&merged);
        let outcome = validate_step(state.current_step, variant, &merged, now.date_naive());
        if !outcome.is_valid {
            tracing::info!(
                session_id,
                step = %state.current_step,
                errors = outcome.errors.len(),
                "step rejected by validation"
            );
            return Ok(AdvanceOutcome::Rejected(outcome));
        }

        let mut metadata = FormData::new();
        if !step_data.is_empty() {
            let mut stamps = state
                .metadata
                .get(META_FIELD_UPDATED_AT)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            for (key, stamp) in stamps_for(&step_data, now) {
                stamps.insert(key, stamp);
            }
            metadata.insert(META_FIELD_UPDATED_AT.to_string(), Value::Object(stamps));
        }

        match next_step(state.current_step, &merged) {
            Some(next) => {
                let updated = self.store.update(
                    session_id,
                    state.version,
                    StatePatch {
                        current_step: Some(next),
                        form_data: Some(step_data),
                        metadata: Some(metadata),
                        ..StatePatch::default()
                    },
                )?;
                tracing::info!(session_id, from = %state.current_step, to = %next, "step advanced");
                Ok(AdvanceOutcome::Advanced(updated))
            }
            None => {
                metadata.insert(META_STATUS.to_string(), json!(STATUS_SUBMITTED));
                metadata.insert(
                    META_STATUS_HISTORY.to_string(),
                    appended_history(&state, STATUS_SUBMITTED, state.channel.label(), now),
                );
                let updated = self.store.update(
                    session_id,
                    state.version,
                    StatePatch {
                        current_step: Some(Step::Completed),
                        form_data: Some(step_data),
                        metadata: Some(metadata),
                        ..StatePatch::default()
                    },
                )?;
                let reference_code = self.codes.generate(session_id)?;
                let submission = CompletedSubmission {
                    session_id: session_id.to_string(),
                    channel: updated.channel,
                    variant,
                    reference_code: reference_code.clone(),
                    form_data: merged,
                };
                match self.sink.submit(submission) {
                    Ok(submission_id) => {
                        tracing::info!(session_id, submission_id, "submission accepted downstream")
                    }
                    // The application is already committed; downstream
                    // delivery is retried out of band.
                    Err(error) => {
                        tracing::warn!(session_id, %error, "submission sink failed")
                    }
                }
                let state = self.get(session_id)?;
                Ok(AdvanceOutcome::Completed {
                    state,
                    reference_code,
                })
            }
        }
    }

    /// Step back along the computed path without validating. From the
    /// completed marker this reopens the last wizard step; at the first step
    /// it is a no-op.
    pub fn back(&self, session_id: &str) -> Result<ApplicationState, ControllerError> {
        let state = self.get(session_id)?;
        let previous = match previous_step(state.current_step, &state.form_data) {
            Some(previous) => previous,
            None => return Ok(state),
        };
        let updated = self
            .store
            .update(session_id, state.version, StatePatch::step(previous))?;
        tracing::info!(session_id, from = %state.current_step, to = %previous, "step reverted");
        Ok(updated)
    }

    /// Record an application status change with the acting user, appending
    /// to the status history.
    pub fn record_status(
        &self,
        session_id: &str,
        status: &str,
        updated_by: &str,
    ) -> Result<ApplicationState, ControllerError> {
        let state = self.get(session_id)?;
        let now = Utc::now();
        let mut metadata = FormData::new();
        metadata.insert(META_STATUS.to_string(), json!(status));
        metadata.insert(
            META_STATUS_HISTORY.to_string(),
            appended_history(&state, status, updated_by, now),
        );
        let updated = self.store.update(
            session_id,
            state.version,
            StatePatch {
                metadata: Some(metadata),
                ..StatePatch::default()
            },
        )?;
        tracing::info!(session_id, status, updated_by, "status recorded");
        Ok(updated)
    }
}

fn stamps_for(data: &FormData, now: chrono::DateTime<Utc>) -> FormData {
    data.keys()
        .map(|key| (key.clone(), json!(now.to_rfc3339())))
        .collect()
}

fn appended_history(
    state: &ApplicationState,
    status: &str,
    updated_by: &str,
    now: chrono::DateTime<Utc>,
) -> Value {
    let mut history = state
        .metadata
        .get(META_STATUS_HISTORY)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    history.push(json!({
        "status": status,
        "timestamp": now.to_rfc3339(),
        "updated_by": updated_by,
    }));
    Value::Array(history)
}
