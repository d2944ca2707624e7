use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::catalog::CatalogLookup;
use super::codes::{CodeError, ReferenceCodeService};
use super::controller::{
    AdvanceOutcome, ControllerError, SubmissionSink, WizardController,
};
use super::detector::FormTypeDetector;
use super::domain::{Channel, FormData};
use super::store::{StateStore, StoreError};
use super::sync::{SyncEngine, SyncError};

/// Shared handler state: the three service facades over one store.
pub struct IntakeState<S, D, K, C> {
    pub controller: WizardController<S, D, K>,
    pub sync: SyncEngine<S, C>,
    pub codes: Arc<ReferenceCodeService<S>>,
}

/// Router builder exposing the intake workflow over HTTP.
pub fn intake_router<S, D, K, C>(state: Arc<IntakeState<S, D, K, C>>) -> Router
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    Router::new()
        .route("/api/v1/intake/sessions", post(start_handler::<S, D, K, C>))
        .route(
            "/api/v1/intake/sessions/:session_id",
            get(get_session_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/advance",
            post(advance_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/back",
            post(back_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/status",
            post(record_status_handler::<S, D, K, C>),
        )
        .route("/api/v1/intake/sync", post(sync_handler::<S, D, K, C>))
        .route(
            "/api/v1/intake/sync/status",
            get(sync_status_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/intake/switch/whatsapp",
            post(switch_whatsapp_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/intake/switch/web",
            post(switch_web_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/reference-codes",
            post(generate_code_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/reference-codes/:code",
            get(resolve_code_handler::<S, D, K, C>),
        )
        .route(
            "/api/v1/reference-codes/:code/extend",
            post(extend_code_handler::<S, D, K, C>),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub channel: Channel,
    pub user_identifier: Option<String>,
    #[serde(default)]
    pub form_data: FormData,
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    #[serde(default)]
    pub form_data: FormData,
}

#[derive(Debug, Deserialize)]
pub struct RecordStatusRequest {
    pub status: String,
    pub updated_by: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub primary_session_id: String,
    pub secondary_session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncStatusQuery {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchWhatsappRequest {
    pub web_session_id: String,
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchWebRequest {
    pub whatsapp_session_id: String,
    pub web_session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateCodeRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendCodeRequest {
    pub days: Option<i64>,
}

fn controller_error_response(error: ControllerError) -> Response {
    let (status, message) = match &error {
        ControllerError::SessionNotFound => (StatusCode::NOT_FOUND, error.to_string()),
        ControllerError::DuplicateSession | ControllerError::ConcurrentModification => {
            (StatusCode::CONFLICT, error.to_string())
        }
        ControllerError::Code(CodeError::GenerationExhausted { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        }
        ControllerError::Store(StoreError::Unavailable(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };
    (status, axum::Json(json!({"error": message}))).into_response()
}

fn sync_error_response(error: SyncError) -> Response {
    let (status, message) = match &error {
        SyncError::NoStatesFound
        | SyncError::WebSessionNotFound(_)
        | SyncError::WhatsappSessionNotFound(_) => (StatusCode::NOT_FOUND, error.to_string()),
        SyncError::Code(CodeError::GenerationExhausted { .. }) => {
            (StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        }
        SyncError::Store(StoreError::VersionConflict) => (StatusCode::CONFLICT, error.to_string()),
        SyncError::Store(StoreError::Unavailable(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };
    (status, axum::Json(json!({"error": message}))).into_response()
}

pub(crate) async fn start_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    axum::Json(request): axum::Json<StartRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state.controller.start(
        request.channel,
        request.user_identifier.as_deref(),
        request.form_data,
        request.resume,
    ) {
        Ok(outcome) => {
            let status = if outcome.resumed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            let payload = json!({
                "resumed": outcome.resumed,
                "session": outcome.state,
            });
            (status, axum::Json(payload)).into_response()
        }
        Err(error) => controller_error_response(error),
    }
}

pub(crate) async fn get_session_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state.controller.get(&session_id) {
        Ok(session) => (StatusCode::OK, axum::Json(session)).into_response(),
        Err(error) => controller_error_response(error),
    }
}

pub(crate) async fn advance_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    Path(session_id): Path<String>,
    axum::Json(request): axum::Json<AdvanceRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state.controller.advance(&session_id, request.form_data) {
        Ok(AdvanceOutcome::Advanced(session)) => {
            let payload = json!({"result": "advanced", "session": session});
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(AdvanceOutcome::Completed {
            state: session,
            reference_code,
        }) => {
            let payload = json!({
                "result": "completed",
                "reference_code": reference_code,
                "session": session,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(AdvanceOutcome::Rejected(outcome)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(outcome)).into_response()
        }
        Err(error) => controller_error_response(error),
    }
}

pub(crate) async fn back_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state.controller.back(&session_id) {
        Ok(session) => (StatusCode::OK, axum::Json(session)).into_response(),
        Err(error) => controller_error_response(error),
    }
}

pub(crate) async fn record_status_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    Path(session_id): Path<String>,
    axum::Json(request): axum::Json<RecordStatusRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state
        .controller
        .record_status(&session_id, &request.status, &request.updated_by)
    {
        Ok(session) => (StatusCode::OK, axum::Json(session)).into_response(),
        Err(error) => controller_error_response(error),
    }
}

pub(crate) async fn sync_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    axum::Json(request): axum::Json<SyncRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state
        .sync
        .synchronize(&request.primary_session_id, &request.secondary_session_id)
    {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => sync_error_response(error),
    }
}

pub(crate) async fn sync_status_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    Query(query): Query<SyncStatusQuery>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state.sync.get_sync_status(&query.left, &query.right) {
        Ok(status) => (StatusCode::OK, axum::Json(status)).into_response(),
        Err(error) => sync_error_response(error),
    }
}

pub(crate) async fn switch_whatsapp_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    axum::Json(request): axum::Json<SwitchWhatsappRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state
        .sync
        .switch_to_whatsapp(&request.web_session_id, &request.phone_number)
    {
        Ok(switch) => (StatusCode::OK, axum::Json(switch)).into_response(),
        Err(error) => sync_error_response(error),
    }
}

pub(crate) async fn switch_web_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    axum::Json(request): axum::Json<SwitchWebRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state
        .sync
        .switch_to_web(&request.whatsapp_session_id, request.web_session_id.as_deref())
    {
        Ok(switch) => (StatusCode::OK, axum::Json(switch)).into_response(),
        Err(error) => sync_error_response(error),
    }
}

pub(crate) async fn generate_code_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    axum::Json(request): axum::Json<GenerateCodeRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state.codes.generate(&request.session_id) {
        Ok(reference_code) => {
            let payload = json!({"reference_code": reference_code});
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(CodeError::SessionNotFound) => {
            let payload = json!({"error": "session not found"});
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error @ CodeError::GenerationExhausted { .. }) => {
            let payload = json!({"error": error.to_string()});
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
        Err(CodeError::Store(error)) => {
            controller_error_response(ControllerError::from(error))
        }
    }
}

pub(crate) async fn resolve_code_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    Path(code): Path<String>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    match state.codes.resolve(&code) {
        Ok(Some(session)) => (StatusCode::OK, axum::Json(session)).into_response(),
        Ok(None) => {
            let payload = json!({"error": "reference code not found or expired"});
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error) => controller_error_response(ControllerError::from(error)),
    }
}

pub(crate) async fn extend_code_handler<S, D, K, C>(
    State(state): State<Arc<IntakeState<S, D, K, C>>>,
    Path(code): Path<String>,
    axum::Json(request): axum::Json<ExtendCodeRequest>,
) -> Response
where
    S: StateStore + 'static,
    D: FormTypeDetector + 'static,
    K: SubmissionSink + 'static,
    C: CatalogLookup + 'static,
{
    let days = request.days.unwrap_or(super::codes::DEFAULT_VALIDITY_DAYS);
    match state.codes.extend(&code, days) {
        Ok(true) => {
            let payload = json!({"extended": true, "days": days});
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(false) => {
            let payload = json!({"error": "reference code not found or expired"});
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error) => controller_error_response(ControllerError::from(error)),
    }
}
