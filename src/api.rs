// Query Service - read-only HTTP API over the items table
// Every request opens its own connection on a blocking worker and drops it
// before the response is sent. Nothing is cached between requests.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, Item, PriceStats};
use crate::error::{ApiError, ApiResult};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Shared application state (immutable)
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub db: &'static str,
    pub etl_last_run: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub data: Vec<Item>,
    pub request_id: String,
    pub api_latency_ms: u64,
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(config: Config) -> Router {
    let state = AppState {
        config: Arc::new(config),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/data", get(get_data))
        .route("/stats", get(get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run `f` against a fresh connection scoped to this call
async fn with_connection<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let path = state.config.database_path.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db::open_for_query(&path)?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("storage task failed: {}", e)))?
    .map_err(ApiError::Storage)
}

// ============================================================================
// Validation
// ============================================================================

/// Resolve defaults and reject out-of-range paging values
pub fn validate_page(params: &DataParams) -> ApiResult<(i64, i64)> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = params.offset.unwrap_or(0);

    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    if offset < 0 {
        return Err(ApiError::BadRequest(format!(
            "offset must be >= 0, got {}",
            offset
        )));
    }

    Ok((limit, offset))
}

fn validate_price_bound(field: &str, value: Option<f64>) -> ApiResult<Option<f64>> {
    match value {
        Some(v) if !v.is_finite() => Err(ApiError::BadRequest(format!(
            "{} must be a finite number",
            field
        ))),
        Some(v) if v < 0.0 => Err(ApiError::BadRequest(format!(
            "{} must be >= 0, got {}",
            field, v
        ))),
        other => Ok(other),
    }
}

/// Min > max is allowed; it simply matches nothing.
pub fn validate_price_range(params: &StatsParams) -> ApiResult<(Option<f64>, Option<f64>)> {
    Ok((
        validate_price_bound("min_price", params.min_price)?,
        validate_price_bound("max_price", params.max_price)?,
    ))
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /health - storage connectivity and last load status
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let probe = with_connection(&state, |conn| {
        db::ping(conn)?;
        db::last_load_run(conn)
    })
    .await;

    let response = match probe {
        Ok(last_run) => HealthResponse {
            db: "connected",
            etl_last_run: last_run.map(|run| run.status.as_str()).unwrap_or("never"),
        },
        Err(e) => {
            warn!("health probe failed: {}", e);
            HealthResponse {
                db: "unavailable",
                etl_last_run: "unknown",
            }
        }
    };

    Json(response)
}

/// GET /data?limit=&offset= - one page of items, ascending id
async fn get_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<DataParams>, QueryRejection>,
) -> ApiResult<Response> {
    let started = Instant::now();
    let request_id = request_id(&headers);

    let Query(params) = params?;
    let (limit, offset) = validate_page(&params)?;

    // Count and page are separate statements; a concurrent load may land between them
    let (total, data) = with_connection(&state, move |conn| {
        let total = db::count_items(conn)?;
        let data = db::fetch_page(conn, limit, offset)?;
        Ok((total, data))
    })
    .await?;

    let api_latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    debug!(%request_id, limit, offset, total, api_latency_ms, "served page");

    let mut response = Json(DataResponse {
        data,
        request_id: request_id.clone(),
        api_latency_ms,
        limit,
        offset,
        total,
    })
    .into_response();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    Ok(response)
}

/// GET /stats?min_price=&max_price= - aggregates over the filtered price range
async fn get_stats(
    State(state): State<AppState>,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> ApiResult<Json<PriceStats>> {
    let Query(params) = params?;
    let (min_price, max_price) = validate_price_range(&params)?;

    let stats =
        with_connection(&state, move |conn| db::price_stats(conn, min_price, max_price)).await?;

    Ok(Json(stats))
}
