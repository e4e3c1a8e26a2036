// Bed Census - Web Server
// REST API over the census engine with Axum

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bed_census::{
    normalize_rows, CensusEngine, CensusError, EngineConfig, RosterRow, SqliteAuditSink,
    SqliteStore,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<CensusEngine<SqliteStore>>>,
}

impl AppState {
    fn engine(&self) -> Result<MutexGuard<'_, CensusEngine<SqliteStore>>, Response> {
        self.engine.lock().map_err(|_| {
            tracing::error!("engine lock poisoned");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "engine unavailable".to_string(),
                serde_json::Value::Null,
            )
        })
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

fn failure(status: StatusCode, message: String, data: serde_json::Value) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data,
            error: Some(message),
        }),
    )
        .into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

/// Domain errors to HTTP statuses
fn error_response(err: CensusError) -> Response {
    let (status, data) = match &err {
        CensusError::ReferentialGap(report) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            serde_json::to_value(report).unwrap_or_default(),
        ),
        CensusError::PlanChanged { expected, actual } => (
            StatusCode::CONFLICT,
            serde_json::json!({ "expected": expected, "actual": actual }),
        ),
        CensusError::BedConflict { .. } | CensusError::DuplicatePatient { .. } => {
            (StatusCode::CONFLICT, serde_json::Value::Null)
        }
        CensusError::NotFound { .. } => (StatusCode::NOT_FOUND, serde_json::Value::Null),
        CensusError::InvalidTransition { .. } | CensusError::BlockReasonRequired => {
            (StatusCode::BAD_REQUEST, serde_json::Value::Null)
        }
        CensusError::CommitRejected(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, serde_json::Value::Null)
        }
        CensusError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, serde_json::Value::Null),
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    failure(status, err.to_string(), data)
}

#[derive(Deserialize)]
struct RosterRequest {
    rows: Vec<RosterRow>,
}

#[derive(Deserialize)]
struct ExecuteRequest {
    rows: Vec<RosterRow>,
    /// Fingerprint of the plan the operator reviewed
    fingerprint: String,
}

#[derive(Serialize)]
struct ValidateResponse {
    valid: bool,
    entries: usize,
    report: bed_census::ValidationReport,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/beds - Bed map with cohort restrictions
async fn get_beds(State(state): State<AppState>) -> Response {
    let engine = match state.engine() {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    match engine.bed_map() {
        Ok(views) => ok(views),
        Err(e) => error_response(e),
    }
}

/// GET /api/summary - Per-sector counts
async fn get_summary(State(state): State<AppState>) -> Response {
    let engine = match state.engine() {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    match engine.summary() {
        Ok(summary) => ok(summary),
        Err(e) => error_response(e),
    }
}

/// POST /api/reconcile/validate - Referential check only
async fn validate_roster(
    State(state): State<AppState>,
    Json(body): Json<RosterRequest>,
) -> Response {
    let entries = normalize_rows(&body.rows);
    let engine = match state.engine() {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    match engine.validate(&entries) {
        Ok(outcome) => ok(ValidateResponse {
            valid: outcome.is_valid(),
            entries: entries.len(),
            report: outcome.report(),
        }),
        Err(e) => error_response(e),
    }
}

/// POST /api/reconcile/plan - Plan for review (nothing is written)
async fn plan_roster(State(state): State<AppState>, Json(body): Json<RosterRequest>) -> Response {
    let entries = normalize_rows(&body.rows);
    let engine = match state.engine() {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    match engine.prepare(&entries) {
        Ok(plan) => ok(plan),
        Err(e) => error_response(e),
    }
}

/// POST /api/reconcile/execute - Apply the reviewed plan
async fn execute_roster(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> Response {
    let entries = normalize_rows(&body.rows);
    let mut engine = match state.engine() {
        Ok(engine) => engine,
        Err(response) => return response,
    };
    match engine.reconcile_confirmed(&entries, &body.fingerprint) {
        Ok(report) => ok(report),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[derive(clap::Parser)]
#[command(name = "bed-census-server", about = "HTTP API for the bed census")]
struct Args {
    /// Configuration file (defaults to bed-census.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = <Args as clap::Parser>::parse();
    let config = EngineConfig::load(args.config.as_deref())?;

    println!("🌐 Bed Census - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = SqliteStore::open(&config.database_path)?;
    let audit = SqliteAuditSink::open(&config.database_path)?;
    println!("✓ Database opened: {:?}", config.database_path);

    let addr = config.server_addr.clone();
    let engine = CensusEngine::new(store, config).with_audit(Arc::new(audit));

    // Create shared state
    let state = AppState {
        engine: Arc::new(Mutex::new(engine)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/beds", get(get_beds))
        .route("/summary", get(get_summary))
        .route("/reconcile/validate", post(validate_roster))
        .route("/reconcile/plan", post(plan_roster))
        .route("/reconcile/execute", post(execute_roster))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/beds", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server stopped")?;
    Ok(())
}
