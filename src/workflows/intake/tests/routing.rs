use super::common::*;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::workflows::intake::domain::{Channel, FormData, Step};
use crate::workflows::intake::router::{
    self, intake_router, AdvanceRequest, StartRequest,
};

fn post_json(uri: &str, payload: &Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::post(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(
            serde_json::to_vec(payload).expect("serialize payload"),
        ))
        .expect("request")
}

#[tokio::test]
async fn start_route_creates_a_web_session() {
    let (state, _) = intake_state();
    let response = intake_router(state)
        .oneshot(post_json("/api/v1/intake/sessions", &json!({"channel": "web"})))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["resumed"], json!(false));
    let session_id = payload["session"]["session_id"]
        .as_str()
        .expect("session id");
    assert!(session_id.starts_with("web_"));
    assert_eq!(payload["session"]["current_step"], json!("employer"));
}

#[tokio::test]
async fn start_route_resumes_the_live_session() {
    let (state, _) = intake_state();
    let first = state
        .controller
        .start(Channel::Whatsapp, Some("263771234567"), FormData::new(), false)
        .expect("start");

    let response = intake_router(state)
        .oneshot(post_json(
            "/api/v1/intake/sessions",
            &json!({"channel": "whatsapp", "user_identifier": "263771234567", "resume": true}),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["resumed"], json!(true));
    assert_eq!(
        payload["session"]["session_id"],
        json!(first.state.session_id)
    );
}

#[tokio::test]
async fn get_session_handler_returns_not_found_for_unknown_id() {
    let (state, _) = intake_state();
    let response = router::get_session_handler::<_, _, _, _>(
        State(state),
        Path("web_missing".to_string()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn advance_handler_rejects_incomplete_step_data() {
    let (state, _) = intake_state();
    let session = state
        .controller
        .start(Channel::Web, None, FormData::new(), false)
        .expect("start")
        .state;

    let response = router::advance_handler::<_, _, _, _>(
        State(state),
        Path(session.session_id),
        axum::Json(AdvanceRequest {
            form_data: FormData::new(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["is_valid"], json!(false));
    assert!(!payload["errors"].as_array().expect("errors").is_empty());
}

#[tokio::test]
async fn advance_handler_reports_concurrent_writers() {
    let state = state_with_store(Arc::new(ConflictStore));
    let response = router::advance_handler::<_, _, _, _>(
        State(state),
        Path("web_contended".to_string()),
        axum::Json(AdvanceRequest {
            form_data: FormData::new(),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn start_handler_surfaces_storage_outages() {
    let state = state_with_store(Arc::new(UnavailableStore));
    let response = router::start_handler::<_, _, _, _>(
        State(state),
        axum::Json(StartRequest {
            channel: Channel::Web,
            user_identifier: None,
            form_data: FormData::new(),
            resume: false,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn sync_route_reports_a_missing_pair() {
    let (state, _) = intake_state();
    let response = intake_router(state)
        .oneshot(post_json(
            "/api/v1/intake/sync",
            &json!({"primary_session_id": "web_a", "secondary_session_id": "whatsapp_b"}),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sync_status_route_reports_divergence() {
    let (state, store) = intake_state();
    seed_session(
        store.as_ref(),
        "web_abc",
        Channel::Web,
        Step::Product,
        &[("language", json!("en"))],
    );
    seed_session(
        store.as_ref(),
        "whatsapp_263771234567",
        Channel::Whatsapp,
        Step::Product,
        &[("language", json!("sn"))],
    );

    let response = intake_router(state)
        .oneshot(
            axum::http::Request::get(
                "/api/v1/intake/sync/status?left=web_abc&right=whatsapp_263771234567",
            )
            .body(axum::body::Body::empty())
            .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], json!("diverged"));
    assert_eq!(payload["inconsistencies"][0]["field"], json!("language"));
}

#[tokio::test]
async fn switch_whatsapp_route_creates_the_counterpart() {
    let (state, store) = intake_state();
    seed_session(
        store.as_ref(),
        "web_abc",
        Channel::Web,
        Step::Account,
        &[("category", json!("agri"))],
    );

    let response = intake_router(state)
        .oneshot(post_json(
            "/api/v1/intake/switch/whatsapp",
            &json!({"web_session_id": "web_abc", "phone_number": "+263 77 123 4567"}),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(
        payload["whatsapp_session_id"],
        json!("whatsapp_263771234567")
    );
    assert_eq!(payload["created"], json!(true));
    assert!(payload["sync_timestamp"].is_string());
    assert_eq!(
        payload["reference_code"].as_str().expect("code").len(),
        6
    );
}

#[tokio::test]
async fn reference_code_routes_round_trip() {
    let (state, store) = intake_state();
    seed_session(
        store.as_ref(),
        "web_abc",
        Channel::Web,
        Step::Summary,
        &[],
    );
    let router = intake_router(state);

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/reference-codes",
            &json!({"session_id": "web_abc"}),
        ))
        .await
        .expect("generate executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    let code = payload["reference_code"].as_str().expect("code").to_string();

    let response = router
        .clone()
        .oneshot(
            axum::http::Request::get(format!("/api/v1/reference-codes/{code}"))
                .body(axum::body::Body::empty())
                .expect("request"),
        )
        .await
        .expect("resolve executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["session_id"], json!("web_abc"));

    let response = router
        .oneshot(
            axum::http::Request::get("/api/v1/reference-codes/ZZZZZZ")
                .body(axum::body::Body::empty())
                .expect("request"),
        )
        .await
        .expect("resolve executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn extend_route_reports_missing_codes() {
    let (state, _) = intake_state();
    let response = intake_router(state)
        .oneshot(post_json(
            "/api/v1/reference-codes/ABC123/extend",
            &json!({"days": 10}),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
