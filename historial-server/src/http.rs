//! Historial HTTP API
//!
//! Axum server exposing the chat history pipeline: paged sessions, CSV export,
//! dashboard stats and analytics for every configured table.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! taking plain arguments, so the inner functions are testable without
//! dispatch machinery.
//!
//! Endpoints:
//! - GET /health                  : gateway reachability
//! - GET /version                 : server version info
//! - GET /tables                  : configured tables and the current one
//! - GET /tables/:table/history   : one page of sessions matching the filters
//! - GET /tables/:table/export    : CSV of every message in the filtered sessions
//! - GET /tables/:table/stats     : dashboard cards and recent sessions
//! - GET /tables/:table/analytics : session classification over a date range
//! - GET /history, /export, /stats, /analytics: same, for the current table

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use historial_core::analytics::AnalyticsRange;
use historial_core::export::CsvExport;
use historial_core::{
    DatePreset, ExportOutcome, FilterSet, HistorialConfig, HistorialError, HistoryService,
    Session, SessionPage, TableConfig, TableRegistry,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const PRESET_PARAM: &str = "preset";

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub service: HistoryService,
    pub registry: TableRegistry,
    pub config: HistorialConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/tables", get(tables_handler))
        .route("/tables/:table/history", get(history_handler))
        .route("/tables/:table/export", get(export_handler))
        .route("/tables/:table/stats", get(stats_handler))
        .route("/tables/:table/analytics", get(analytics_handler))
        .route("/history", get(current_history_handler))
        .route("/export", get(current_export_handler))
        .route("/stats", get(current_stats_handler))
        .route("/analytics", get(current_analytics_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(state: Arc<HttpState>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Historial HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Response DTOs
// ============================================================================

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub table: Option<String>,
    pub page: u32,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    /// Filters as URL query pairs, `page` included when not 1
    pub filters: Vec<(String, String)>,
    pub sessions: Vec<Session>,
}

impl HistoryResponse {
    pub fn new(table: Option<&TableConfig>, filters: &FilterSet, page: SessionPage) -> Self {
        let sessions = match table {
            Some(t) => page.sessions(&t.analytics),
            None => Vec::new(),
        };
        Self {
            table: table.map(|t| t.id.clone()),
            page: page.page,
            page_size: page.page_size,
            total_count: page.total_count,
            total_pages: page.total_pages,
            filters: filters.to_query_pairs(),
            sessions,
        }
    }
}

/// Result of the export endpoint: a CSV attachment or a JSON status.
#[derive(Debug)]
pub enum ExportReply {
    Csv(CsvExport),
    Json(StatusCode, Value),
}

impl IntoResponse for ExportReply {
    fn into_response(self) -> Response {
        match self {
            ExportReply::Csv(export) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", export.filename),
                    ),
                ],
                export.content,
            )
                .into_response(),
            ExportReply::Json(status, body) => (status, Json(body)).into_response(),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// HTTP status for a pipeline error.
pub fn error_status(err: &HistorialError) -> StatusCode {
    match err {
        HistorialError::Gateway(_) => StatusCode::BAD_GATEWAY,
        HistorialError::InvalidFilter { .. } => StatusCode::BAD_REQUEST,
        HistorialError::UnknownTable(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_body(err: &HistorialError) -> (StatusCode, Value) {
    let status = error_status(err);
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    } else {
        tracing::warn!(error = %err, "Request rejected");
    }
    (status, json!(ErrorResponse::new(err.to_string())))
}

/// Filter state from URL query pairs. `preset` expands to `from`/`to`
/// without disturbing an explicit `page`.
pub fn filters_from_params(
    params: &[(String, String)],
    service: &HistoryService,
) -> std::result::Result<FilterSet, HistorialError> {
    let preset = params
        .iter()
        .find(|(k, v)| k == PRESET_PARAM && !v.is_empty())
        .map(|(_, v)| v.parse::<DatePreset>())
        .transpose()?;

    let mut filters = FilterSet::from_query_pairs(
        params
            .iter()
            .filter(|(k, _)| k != PRESET_PARAM)
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );
    if let Some(preset) = preset {
        let page = filters.page();
        filters.apply_preset(preset, service.context().today());
        filters.set_page(page);
    }
    Ok(filters)
}

/// Analytics window from `preset`, or `from`/`to`; `None` means the default window.
pub fn range_from_params(
    params: &[(String, String)],
    service: &HistoryService,
) -> std::result::Result<Option<AnalyticsRange>, HistorialError> {
    let get = |key: &str| {
        params
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
    };
    if let Some(preset) = get(PRESET_PARAM) {
        let preset: DatePreset = preset.parse()?;
        return Ok(Some(AnalyticsRange::preset(preset, service.context().today())));
    }
    let (from, to) = (get("from"), get("to"));
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    Ok(Some(AnalyticsRange::new(from, to)))
}

fn lookup<'a>(registry: &'a TableRegistry, table: &str) -> std::result::Result<&'a TableConfig, (StatusCode, Value)> {
    registry.require(table).map_err(|e| error_body(&e))
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check: pings the gateway.
pub async fn health_inner(service: &HistoryService) -> (StatusCode, Value) {
    match service.ping().await {
        Ok(backend) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "gateway": service.gateway_name(),
                "backend": backend,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Gateway health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "status": "unhealthy",
                    "gateway": service.gateway_name(),
                    "error": e.to_string(),
                }),
            )
        }
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "historial/1",
    })
}

pub fn tables_inner(registry: &TableRegistry) -> Value {
    json!({
        "current": registry.current_id(),
        "tables": registry.list(),
    })
}

pub async fn history_inner(
    service: &HistoryService,
    table: Option<&TableConfig>,
    params: &[(String, String)],
) -> (StatusCode, Value) {
    let filters = match filters_from_params(params, service) {
        Ok(f) => f,
        Err(e) => return error_body(&e),
    };
    match service.history(table, &filters).await {
        Ok(page) => (StatusCode::OK, json!(HistoryResponse::new(table, &filters, page))),
        Err(e) => error_body(&e),
    }
}

pub async fn export_inner(
    service: &HistoryService,
    table: Option<&TableConfig>,
    params: &[(String, String)],
) -> ExportReply {
    let filters = match filters_from_params(params, service) {
        Ok(f) => f,
        Err(e) => {
            let (status, body) = error_body(&e);
            return ExportReply::Json(status, body);
        }
    };
    match service.export(table, &filters).await {
        Ok(ExportOutcome::Ready(export)) => ExportReply::Csv(export),
        Ok(ExportOutcome::Empty) => ExportReply::Json(
            StatusCode::NOT_FOUND,
            json!({
                "status": "empty",
                "message": "No hay datos para exportar con los filtros actuales.",
            }),
        ),
        Err(e) => {
            let (status, body) = error_body(&e);
            ExportReply::Json(status, body)
        }
    }
}

pub async fn stats_inner(service: &HistoryService, table: Option<&TableConfig>) -> (StatusCode, Value) {
    match service.stats(table).await {
        Ok(stats) => (StatusCode::OK, json!(stats)),
        Err(e) => error_body(&e),
    }
}

pub async fn analytics_inner(
    service: &HistoryService,
    table: Option<&TableConfig>,
    params: &[(String, String)],
) -> (StatusCode, Value) {
    let range = match range_from_params(params, service) {
        Ok(r) => r,
        Err(e) => return error_body(&e),
    };
    match service.analytics(table, range).await {
        Ok(report) => (StatusCode::OK, json!(report)),
        Err(e) => error_body(&e),
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

type Params = Query<Vec<(String, String)>>;

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.service).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn tables_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(tables_inner(&state.registry)))
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    Path(table): Path<String>,
    Query(params): Params,
) -> impl IntoResponse {
    let (status, body) = match lookup(&state.registry, &table) {
        Ok(t) => history_inner(&state.service, Some(t), &params).await,
        Err(reply) => reply,
    };
    (status, Json(body))
}

pub async fn export_handler(
    State(state): State<Arc<HttpState>>,
    Path(table): Path<String>,
    Query(params): Params,
) -> impl IntoResponse {
    match lookup(&state.registry, &table) {
        Ok(t) => export_inner(&state.service, Some(t), &params).await,
        Err((status, body)) => ExportReply::Json(status, body),
    }
}

pub async fn stats_handler(
    State(state): State<Arc<HttpState>>,
    Path(table): Path<String>,
) -> impl IntoResponse {
    let (status, body) = match lookup(&state.registry, &table) {
        Ok(t) => stats_inner(&state.service, Some(t)).await,
        Err(reply) => reply,
    };
    (status, Json(body))
}

pub async fn analytics_handler(
    State(state): State<Arc<HttpState>>,
    Path(table): Path<String>,
    Query(params): Params,
) -> impl IntoResponse {
    let (status, body) = match lookup(&state.registry, &table) {
        Ok(t) => analytics_inner(&state.service, Some(t), &params).await,
        Err(reply) => reply,
    };
    (status, Json(body))
}

pub async fn current_history_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Params,
) -> impl IntoResponse {
    let (status, body) = history_inner(&state.service, state.registry.current(), &params).await;
    (status, Json(body))
}

pub async fn current_export_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Params,
) -> impl IntoResponse {
    export_inner(&state.service, state.registry.current(), &params).await
}

pub async fn current_stats_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = stats_inner(&state.service, state.registry.current()).await;
    (status, Json(body))
}

pub async fn current_analytics_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Params,
) -> impl IntoResponse {
    let (status, body) = analytics_inner(&state.service, state.registry.current(), &params).await;
    (status, Json(body))
}

// ============================================================================
// Unit tests: call inner functions directly
// ============================================================================
