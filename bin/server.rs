// Statement Ingest - Web Server
// Thin HTTP adapter over the import pipeline. The owner comes from the
// X-User-ID header set by the upstream gateway; no auth happens here.

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartError, DefaultBodyLimit, FromRequest, Multipart, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use statement_ingest::{
    init_logging, Config, Direction, ImportSummary, IngestError, Ingestor, SqliteStore,
    StoreError, StoredTransaction, TransactionFilter, TransactionStore,
};

/// Uploads larger than this are rejected before parsing
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
struct AppState {
    ingestor: Arc<Ingestor<SqliteStore>>,
    upload_source: String,
    default_source: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
enum ApiError {
    #[error("User ID is required")]
    MissingUser,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingUser | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Ingest(IngestError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Ingest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn user_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("X-User-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingUser)
}

// ============================================================================
// API Types
// ============================================================================

/// Import response: the summary plus a human-readable message
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    message: String,
    count: usize,
    #[serde(flatten)]
    summary: ImportSummary,
}

impl From<ImportSummary> for ImportResponse {
    fn from(summary: ImportSummary) -> Self {
        ImportResponse {
            message: summary.message(),
            count: summary.processed_count,
            summary,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanRequest {
    #[serde(default)]
    folder_path: String,
    #[serde(default)]
    source: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    category: Option<String>,
    #[serde(rename = "type")]
    direction: Option<String>,
    q: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl TransactionQuery {
    fn into_filter(self) -> ApiResult<TransactionFilter> {
        let date = |raw: Option<String>, name: &str| -> ApiResult<Option<NaiveDate>> {
            raw.filter(|s| !s.is_empty())
                .map(|s| {
                    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| {
                        ApiError::BadRequest(format!("Invalid {} format. Use YYYY-MM-DD", name))
                    })
                })
                .transpose()
        };

        Ok(TransactionFilter {
            start: date(self.start_date, "startDate")?,
            end: date(self.end_date, "endDate")?,
            category: self.category.filter(|s| !s.is_empty()),
            direction: self
                .direction
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<Direction>().map_err(ApiError::BadRequest))
                .transpose()?,
            search: self.q.filter(|s| !s.is_empty()),
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Serialize)]
struct TransactionsResponse {
    transactions: Vec<StoredTransaction>,
    total: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /ping - Health check
async fn ping() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "import" }))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Contents of the `file` form field
async fn read_file_field(mut multipart: Multipart) -> ApiResult<Bytes> {
    let form_error =
        |_: MultipartError| ApiError::BadRequest("Failed to get file from form".to_string());

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        if field.name() == Some("file") {
            return field.bytes().await.map_err(form_error);
        }
    }
    Err(ApiError::BadRequest("Failed to get file from form".to_string()))
}

/// POST /upload - Import a CSV sent as the multipart field `file` or as the
/// raw request body
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> ApiResult<Json<ImportResponse>> {
    let owner = user_id(&headers)?;
    let body = if is_multipart(&headers) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|_| ApiError::BadRequest("Failed to parse form".to_string()))?;
        read_file_field(multipart).await?
    } else {
        Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
    };
    let source = headers
        .get("X-Source")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.upload_source.clone());
    info!(owner = %owner, bytes = body.len(), "Upload request received");

    let ingestor = state.ingestor.clone();
    let summary = tokio::task::spawn_blocking(move || ingestor.import_file(&owner, &body, &source))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    if summary.normalized_count() == 0 {
        return Err(ApiError::BadRequest(
            "No valid transactions found in CSV".to_string(),
        ));
    }

    Ok(Json(summary.into()))
}

/// POST /scan - Import every CSV in a server-side folder
async fn scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> ApiResult<Json<ImportResponse>> {
    let owner = user_id(&headers)?;
    if req.folder_path.trim().is_empty() {
        return Err(ApiError::BadRequest("Folder path is required".to_string()));
    }
    let source = if req.source.trim().is_empty() {
        state.default_source.clone()
    } else {
        req.source
    };
    let dir = PathBuf::from(req.folder_path);

    let ingestor = state.ingestor.clone();
    let summary = tokio::task::spawn_blocking(move || {
        // A folder that does not exist simply holds no CSV files
        ingestor
            .import_directory(&owner, &dir, &source)
            .map_err(|e| match e {
                IngestError::Io(err) if err.kind() == io::ErrorKind::NotFound => {
                    IngestError::NoCsvFiles { dir }
                }
                other => other,
            })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(summary.into()))
}

/// GET /transactions - Stored transactions for the caller, newest first
async fn transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<Json<TransactionsResponse>> {
    let owner = user_id(&headers)?;
    let filter = query.into_filter()?;

    let ingestor = state.ingestor.clone();
    let response = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
        let store = ingestor.store();
        Ok(TransactionsResponse {
            total: store.count_by_owner(&owner, &filter)?,
            transactions: store.find_by_owner(&owner, &filter)?,
        })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(response))
}

fn app(state: AppState) -> Router {
    // No /api/import prefix: the gateway adds it
    Router::new()
        .route("/ping", get(ping))
        .route("/upload", post(upload))
        .route("/scan", post(scan))
        .route("/transactions", get(transactions))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("statement_ingest=info,ingest_server=info,tower_http=debug");

    let config = Config::from_env()?;
    let store = SqliteStore::open(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database opened");

    let state = AppState {
        ingestor: Arc::new(Ingestor::new(store, config.parse_options())),
        upload_source: config.upload_source.clone(),
        default_source: config.default_source.clone(),
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Import service running on http://{}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
