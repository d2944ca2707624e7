//! Application state persistence seam.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::domain::{ApplicationState, Channel, NewState, StatePatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a session with this identifier already exists")]
    DuplicateSession,
    #[error("session not found")]
    NotFound,
    #[error("state was modified concurrently")]
    VersionConflict,
    #[error("state storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for application states.
///
/// `update` carries the version the caller loaded; a mismatch means another
/// writer got there first and the caller must re-read and retry.
pub trait StateStore: Send + Sync {
    fn create(&self, state: NewState) -> Result<ApplicationState, StoreError>;

    /// Fetch a live (non-expired) state.
    fn get(&self, session_id: &str) -> Result<Option<ApplicationState>, StoreError>;

    fn update(
        &self,
        session_id: &str,
        expected_version: u64,
        patch: StatePatch,
    ) -> Result<ApplicationState, StoreError>;

    /// Resolve a reference code. Only the code's own expiry is checked here;
    /// codes deliberately outlive the working session so applicants can still
    /// look up their application after the session TTL lapses.
    fn find_by_reference_code(&self, code: &str) -> Result<Option<ApplicationState>, StoreError>;

    /// The most recently updated live state for a user on a channel.
    fn find_active_by_user(
        &self,
        channel: Channel,
        user_identifier: &str,
    ) -> Result<Option<ApplicationState>, StoreError>;
}

/// Mutex-guarded in-memory store backing the binary and the tests.
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, ApplicationState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ApplicationState>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("state store mutex poisoned".to_string()))
    }
}

fn apply_patch(state: &mut ApplicationState, patch: StatePatch, now: DateTime<Utc>) {
    if let Some(step) = patch.current_step {
        state.current_step = step;
    }
    if let Some(form_data) = patch.form_data {
        for (key, value) in form_data {
            state.form_data.insert(key, value);
        }
    }
    if let Some(metadata) = patch.metadata {
        for (key, value) in metadata {
            state.metadata.insert(key, value);
        }
    }
    if let Some(code) = patch.reference_code {
        state.reference_code = Some(code);
    }
    if let Some(expires) = patch.reference_code_expires_at {
        state.reference_code_expires_at = Some(expires);
    }
    if let Some(expires) = patch.expires_at {
        state.expires_at = expires;
    }
    state.version += 1;
    state.updated_at = now;
}

impl StateStore for MemoryStateStore {
    fn create(&self, state: NewState) -> Result<ApplicationState, StoreError> {
        let mut records = self.lock()?;
        if records.contains_key(&state.session_id) {
            return Err(StoreError::DuplicateSession);
        }
        let now = Utc::now();
        let record = ApplicationState {
            session_id: state.session_id.clone(),
            channel: state.channel,
            user_identifier: state.user_identifier,
            current_step: state.current_step,
            form_data: state.form_data,
            metadata: state.metadata,
            reference_code: state.reference_code,
            reference_code_expires_at: state.reference_code_expires_at,
            expires_at: state.expires_at,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        records.insert(state.session_id, record.clone());
        Ok(record)
    }

    fn get(&self, session_id: &str) -> Result<Option<ApplicationState>, StoreError> {
        let records = self.lock()?;
        let now = Utc::now();
        Ok(records
            .get(session_id)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    fn update(
        &self,
        session_id: &str,
        expected_version: u64,
        patch: StatePatch,
    ) -> Result<ApplicationState, StoreError> {
        let mut records = self.lock()?;
        let record = records.get_mut(session_id).ok_or(StoreError::NotFound)?;
        if record.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        apply_patch(record, patch, Utc::now());
        Ok(record.clone())
    }

    fn find_by_reference_code(&self, code: &str) -> Result<Option<ApplicationState>, StoreError> {
        let records = self.lock()?;
        let now = Utc::now();
        Ok(records
            .values()
            .filter(|record| record.reference_code.as_deref() == Some(code))
            .find(|record| record.reference_code_active(now))
            .cloned())
    }

    fn find_active_by_user(
        &self,
        channel: Channel,
        user_identifier: &str,
    ) -> Result<Option<ApplicationState>, StoreError> {
        let records = self.lock()?;
        let now = Utc::now();
        Ok(records
            .values()
            .filter(|record| {
                record.channel == channel
                    && record.user_identifier == user_identifier
                    && !record.is_expired(now)
            })
            .max_by_key(|record| record.updated_at)
            .cloned())
    }
}
