// HTTP surface
//
// POST /api/upload runs the whole pipeline for one multipart upload.
// The store sits behind a mutex; it is never held across an await.

use crate::delivery::{is_valid_email, DeliverySink};
use crate::error::{ConfigError, PipelineError, StoreError};
use crate::models::{SummaryReport, TransactionRecord};
use crate::pipeline::{Pipeline, RunOutcome};
use crate::store::SqliteStore;
use crate::transform::YearPolicy;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    store: Arc<Mutex<SqliteStore>>,
    sink: Arc<dyn DeliverySink>,
    year: YearPolicy,
    size_limit: u64,
}

impl AppState {
    pub fn new(store: SqliteStore, sink: Arc<dyn DeliverySink>, year: YearPolicy, size_limit: u64) -> Self {
        AppState {
            store: Arc::new(Mutex::new(store)),
            sink,
            year,
            size_limit,
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, SqliteStore>, ApiError> {
        self.store
            .lock()
            .map_err(|_| ApiError::internal("database lock poisoned"))
    }
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidRecipient(_) | PipelineError::Source(_) => {
                ApiError::bad_request(err.to_string())
            }
            PipelineError::Store(_) | PipelineError::Summary(_) | PipelineError::Delivery(_) => {
                error!(error = %err, "request failed");
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

/// GET / - Upload form
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/upload - multipart `email` + `file`
async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<RunOutcome> {
    let mut email = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed upload: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("email") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("malformed upload: {e}")))?;
                email = Some(text.trim().to_string());
            }
            Some("file") => {
                let name = field.file_name().unwrap_or("upload.csv").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("malformed upload: {e}")))?;
                file = Some((name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let email = email.unwrap_or_default();
    if !is_valid_email(&email) {
        warn!(email = %email, "rejecting upload with invalid email");
        return Err(ApiError::bad_request("Invalid email format"));
    }

    let (name, bytes) = file.ok_or_else(|| ApiError::bad_request("Could not retrieve the file"))?;
    info!(file = %name, bytes = bytes.len(), "upload received");

    let store = state.store()?;
    let pipeline = Pipeline::new(&*store, state.year).with_size_limit(state.size_limit);

    let ingest = pipeline.ingest_bytes(&name, &bytes)?;
    let report = pipeline.summarize(&email)?;
    state.sink.deliver(&report).map_err(PipelineError::from)?;

    Ok(Json(ApiResponse::ok(RunOutcome { ingest, report })))
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    email: String,
}

/// GET /api/summary?email= - Summary of the current store, not delivered
async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<SummaryReport> {
    if !is_valid_email(&query.email) {
        return Err(ApiError::bad_request("Invalid email format"));
    }

    let store = state.store()?;
    let report = Pipeline::new(&*store, state.year).summarize(&query.email)?;

    Ok(Json(ApiResponse::ok(report)))
}

/// GET /api/transactions - Every stored record
async fn get_transactions(State(state): State<AppState>) -> ApiResult<Vec<TransactionRecord>> {
    let store = state.store()?;
    Ok(Json(ApiResponse::ok(store.list_records()?)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    // Above the file limit: oversized CSVs are reported by the size gate
    let body_limit = usize::try_from(state.size_limit)
        .unwrap_or(usize::MAX)
        .saturating_mul(2)
        .saturating_add(64 * 1024);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/upload", post(upload))
        .route("/summary", get(get_summary))
        .route("/transactions", get(get_transactions))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

/// Bind address from `TXN_BIND_ADDR`, default `0.0.0.0:3000`.
pub fn bind_addr_from<F>(lookup: F) -> Result<std::net::SocketAddr, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup("TXN_BIND_ADDR")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "0.0.0.0:3000".to_string());

    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: "TXN_BIND_ADDR".to_string(),
        value,
    })
}
