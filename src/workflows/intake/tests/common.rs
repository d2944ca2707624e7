use std::sync::Arc;

use axum::response::Response;
use chrono::{Duration, Utc};
use serde_json::Value;

use crate::workflows::intake::catalog::{CatalogKind, StaticCatalog};
use crate::workflows::intake::codes::{OsRngCodes, ReferenceCodeService};
use crate::workflows::intake::controller::{TracingSink, WizardController};
use crate::workflows::intake::detector::MarkerDetector;
use crate::workflows::intake::domain::{
    ApplicationState, Channel, FormData, NewState, SessionLifetimes, StatePatch, Step,
};
use crate::workflows::intake::router::IntakeState;
use crate::workflows::intake::store::{MemoryStateStore, StateStore, StoreError};
use crate::workflows::intake::sync::SyncEngine;

pub(super) type MemoryIntakeState =
    IntakeState<MemoryStateStore, MarkerDetector, TracingSink, StaticCatalog>;

pub(super) fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_entry(CatalogKind::Category, "agri", "Agriculture")
        .with_entry(CatalogKind::Business, "seeds", "Seed Co")
}

pub(super) fn intake_state() -> (Arc<MemoryIntakeState>, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    (state_with_store(store.clone()), store)
}

pub(super) fn state_with_store<S: StateStore + 'static>(
    store: Arc<S>,
) -> Arc<IntakeState<S, MarkerDetector, TracingSink, StaticCatalog>> {
    let codes = Arc::new(ReferenceCodeService::new(store.clone(), Arc::new(OsRngCodes)));
    let lifetimes = SessionLifetimes::default();
    Arc::new(IntakeState {
        controller: WizardController::new(
            store.clone(),
            Arc::new(MarkerDetector),
            Arc::new(TracingSink),
            codes.clone(),
            lifetimes,
        ),
        sync: SyncEngine::new(store, Arc::new(catalog()), codes.clone(), lifetimes),
        codes,
    })
}

pub(super) fn seed_session(
    store: &impl StateStore,
    session_id: &str,
    channel: Channel,
    step: Step,
    entries: &[(&str, Value)],
) -> ApplicationState {
    let mut form_data = FormData::new();
    for (key, value) in entries {
        form_data.insert((*key).to_string(), value.clone());
    }
    store
        .create(NewState {
            session_id: session_id.to_string(),
            channel,
            user_identifier: session_id.to_string(),
            current_step: step,
            form_data,
            metadata: FormData::new(),
            expires_at: Utc::now() + Duration::days(7),
            reference_code: None,
            reference_code_expires_at: None,
        })
        .expect("seed state")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Store double whose reads succeed but whose writes always lose the
/// version race.
pub(super) struct ConflictStore;

fn summary_state() -> ApplicationState {
    let now = Utc::now();
    ApplicationState {
        session_id: "web_contended".to_string(),
        channel: Channel::Web,
        user_identifier: "web_contended".to_string(),
        current_step: Step::Summary,
        form_data: FormData::new(),
        metadata: FormData::new(),
        reference_code: None,
        reference_code_expires_at: None,
        expires_at: now + Duration::hours(24),
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

impl StateStore for ConflictStore {
    fn create(&self, _state: NewState) -> Result<ApplicationState, StoreError> {
        Err(StoreError::DuplicateSession)
    }

    fn get(&self, _session_id: &str) -> Result<Option<ApplicationState>, StoreError> {
        Ok(Some(summary_state()))
    }

    fn update(
        &self,
        _session_id: &str,
        _expected_version: u64,
        _patch: StatePatch,
    ) -> Result<ApplicationState, StoreError> {
        Err(StoreError::VersionConflict)
    }

    fn find_by_reference_code(&self, _code: &str) -> Result<Option<ApplicationState>, StoreError> {
        Ok(None)
    }

    fn find_active_by_user(
        &self,
        _channel: Channel,
        _user_identifier: &str,
    ) -> Result<Option<ApplicationState>, StoreError> {
        Ok(None)
    }
}

pub(super) struct UnavailableStore;

impl StateStore for UnavailableStore {
    fn create(&self, _state: NewState) -> Result<ApplicationState, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn get(&self, _session_id: &str) -> Result<Option<ApplicationState>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn update(
        &self,
        _session_id: &str,
        _expected_version: u64,
        _patch: StatePatch,
    ) -> Result<ApplicationState, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn find_by_reference_code(&self, _code: &str) -> Result<Option<ApplicationState>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn find_active_by_user(
        &self,
        _channel: Channel,
        _user_identifier: &str,
    ) -> Result<Option<ApplicationState>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}
