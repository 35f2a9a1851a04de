//! HTTP API
//!
//! - POST /api/operations/prepare - Create an operation awaiting signature
//! - POST /api/operations/execute - Submit the origin signature
//! - GET  /api/operations/{id} - Operation status
//! - GET|HEAD /api/accounts/{originKey} - Smart account lookup / existence
//! - GET  /api/accounts/{originKey}/balance - Native balance
//! - GET  /api/accounts/{originKey}/history - Paginated operation history
//! - GET  /health - Liveness
//! - GET  /metrics - Prometheus metrics

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use eyre::{eyre, WrapErr};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RelayerError;
use crate::lifecycle::{
    ExecuteResponse, HistoryPage, OperationManager, PrepareRequest, PrepareResponse,
};
use crate::metrics;
use crate::types::{OperationId, OperationKind, OperationParams, OperationView, OriginKey, SmartAccount};

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<OperationManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<OperationManager>) -> Self {
        Self {
            manager,
            started_at: Instant::now(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, RelayerError>;

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareBody {
    pub public_key: String,
    pub operation_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    pub operation_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: String,
    pub lamports: u64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
}

/// Count failed requests by route and error code
fn tracked<T>(operation: &'static str, result: Result<T, RelayerError>) -> ApiResult<T> {
    match result {
        Ok(value) => Ok(Json(value)),
        Err(e) => {
            debug!(operation, code = e.code(), error = %e, "Request failed");
            metrics::record_error(operation, e.code());
            Err(e)
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, RelayerError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| RelayerError::client(rejection.body_text()))
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, RelayerError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| RelayerError::client(rejection.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn prepare_operation(
    State(state): State<AppState>,
    payload: Result<Json<PrepareBody>, JsonRejection>,
) -> ApiResult<PrepareResponse> {
    let result = async {
        let body = json_body(payload)?;
        let actor_key = OriginKey::from_hex(&body.public_key)?;
        let kind: OperationKind = body.operation_type.parse()?;
        let params = OperationParams::from_request(kind, body.params)?;
        state
            .manager
            .prepare(PrepareRequest {
                actor_key,
                params,
                timestamp: body.timestamp,
            })
            .await
    }
    .await;
    tracked("prepare", result)
}

pub async fn execute_operation(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteBody>, JsonRejection>,
) -> ApiResult<ExecuteResponse> {
    let result = async {
        let body = json_body(payload)?;
        if body.operation_id.is_empty() {
            return Err(RelayerError::client("Missing required field: operationId"));
        }
        state
            .manager
            .execute(&OperationId(body.operation_id), &body.signature)
            .await
    }
    .await;
    tracked("execute", result)
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> ApiResult<OperationView> {
    let result = state.manager.status(&OperationId(operation_id)).await;
    tracked("status", result)
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(origin_key): Path<String>,
) -> ApiResult<SmartAccount> {
    let result = async {
        let key = OriginKey::from_hex(&origin_key)?;
        state
            .manager
            .account(&key)
            .await?
            .ok_or_else(|| RelayerError::not_found("Smart account not found"))
    }
    .await;
    tracked("account", result)
}

/// Existence check: 200 when the smart account exists, 404 otherwise
pub async fn account_exists(
    State(state): State<AppState>,
    Path(origin_key): Path<String>,
) -> Response {
    let result = async {
        let key = OriginKey::from_hex(&origin_key)?;
        state.manager.account(&key).await
    }
    .await;
    match result {
        Ok(Some(_)) => StatusCode::OK.into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            metrics::record_error("account_exists", e.code());
            e.status_code().into_response()
        }
    }
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(origin_key): Path<String>,
) -> ApiResult<BalanceResponse> {
    let result = async {
        let key = OriginKey::from_hex(&origin_key)?;
        let balance = state.manager.resolver().balance(&key).await?;
        Ok::<_, RelayerError>(BalanceResponse {
            address: balance.address.to_string(),
            lamports: balance.lamports,
        })
    }
    .await;
    tracked("balance", result)
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(origin_key): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<HistoryPage> {
    let result = async {
        let query = query_params(query)?;
        let key = OriginKey::from_hex(&origin_key)?;
        state.manager.history(&key, query.page, query.limit).await
    }
    .await;
    tracked("history", result)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/operations/prepare", post(prepare_operation))
        .route("/api/operations/execute", post(execute_operation))
        .route("/api/operations/{operation_id}", get(get_operation))
        .route(
            "/api/accounts/{origin_key}",
            get(get_account).head(account_exists),
        )
        .route("/api/accounts/{origin_key}/balance", get(get_balance))
        .route("/api/accounts/{origin_key}/history", get(get_history))
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP API, serving until `shutdown` resolves
pub async fn start_server(
    bind_address: &str,
    port: u16,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);
    info!("  /api/operations - Prepare, execute and query operations");
    info!("  /api/accounts   - Smart account lookup, balance and history");
    info!("  /metrics        - Prometheus metrics");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .wrap_err("API server error")?;

    info!("API server stopped");
    Ok(())
}
