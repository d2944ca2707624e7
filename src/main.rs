use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use loanbridge::config::{AppConfig, SessionConfig};
use loanbridge::error::AppError;
use loanbridge::telemetry;
use loanbridge::workflows::intake::{
    compute_steps, intake_router, FormData, FormTypeDetector, IntakeState, MarkerDetector,
    MemoryStateStore, OsRngCodes, ReferenceCodeService, StaticCatalog, SyncEngine, TracingSink,
    WizardController,
};

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "LoanBridge Intake Service",
    about = "Run the cross-channel loan application intake service from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Print the wizard path implied by a JSON form-data file
    Steps(StepsArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct StepsArgs {
    /// Path to a JSON object of accumulated form data
    #[arg(long)]
    data: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Steps(args) => run_steps(args),
    }
}

type ServiceState =
    IntakeState<MemoryStateStore, MarkerDetector, TracingSink, StaticCatalog>;

fn build_intake_state(sessions: &SessionConfig) -> Arc<ServiceState> {
    let store = Arc::new(MemoryStateStore::new());
    let detector = Arc::new(MarkerDetector);
    let sink = Arc::new(TracingSink);
    let catalog = Arc::new(StaticCatalog::new());
    let codes = Arc::new(ReferenceCodeService::with_limits(
        store.clone(),
        Arc::new(OsRngCodes),
        sessions.reference_code_ttl_days,
        sessions.code_attempts,
    ));
    let lifetimes = sessions.lifetimes();
    Arc::new(IntakeState {
        controller: WizardController::new(
            store.clone(),
            detector,
            sink,
            codes.clone(),
            lifetimes,
        ),
        sync: SyncEngine::new(store, catalog, codes.clone(), lifetimes),
        codes,
    })
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(intake_router(build_intake_state(&config.sessions)))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "loan intake service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn run_steps(args: StepsArgs) -> Result<(), AppError> {
    let raw = std::fs::read_to_string(&args.data)?;
    let data: FormData = serde_json::from_str(&raw)?;

    let variant = MarkerDetector.detect(&data);
    println!("Detected form: {}", variant.form_id());
    println!("Wizard path:");
    for (index, step) in compute_steps(&data).iter().enumerate() {
        println!("{:>3}. {}", index + 1, step);
    }

    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
