//! HTTP integration tests for the Historial API
//!
//! The router is driven end to end with `oneshot` against an in-memory
//! gateway seeded with chat rows, so no backend is required.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use historial_core::{
    FilterContext, HistorialConfig, HistoryService, MemoryGateway, TableRegistry,
};
use historial_server::http::{build_router, HttpState};
use serde_json::{json, Value};
use tower::ServiceExt;

const CONFIG: &str = r#"
[gateway]
url = "http://localhost:54321"
api_key = "test-key"
"#;

fn rows() -> Vec<Value> {
    let mut rows = Vec::new();
    for i in 0..18 {
        let session = format!("sess-{:02}", i);
        let text = if i % 3 == 0 {
            "Humano: ¿Hacen radiografías panorámicas? IA: Sí, de lunes a viernes"
        } else {
            "Humano: Hola IA: ¡Hola! ¿En qué puedo ayudarte?"
        };
        rows.push(json!({
            "id": i * 2,
            "session_id": session,
            "created_at": format!("2024-03-{:02}T09:00:00Z", i + 1),
            "message": {"type": "human", "text": text}
        }));
        rows.push(json!({
            "id": i * 2 + 1,
            "session_id": session,
            "created_at": format!("2024-03-{:02}T09:05:00Z", i + 1),
            "message": {"type": "ai", "text": "Gracias, \"hasta pronto\""}
        }));
    }
    rows
}

fn make_state(gw: Arc<MemoryGateway>, registry: TableRegistry) -> Arc<HttpState> {
    let config = HistorialConfig::from_toml_str(CONFIG).unwrap();
    Arc::new(HttpState {
        service: HistoryService::new(gw, FilterContext::utc(), 200),
        registry,
        config,
    })
}

fn seeded_state() -> (Arc<MemoryGateway>, Arc<HttpState>) {
    let gw = Arc::new(MemoryGateway::with_rows("n8n_historial", rows()));
    let state = make_state(gw.clone(), TableRegistry::builtin());
    (gw, state)
}

async fn get(state: Arc<HttpState>, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let app = build_router(state);
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

async fn get_json(state: Arc<HttpState>, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get(state, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_version_via_oneshot() {
    let (_, state) = seeded_state();
    let (status, json) = get_json(state, "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["protocol"], "historial/1");
}

#[tokio::test]
async fn test_health_via_oneshot() {
    let (gw, state) = seeded_state();
    let (status, json) = get_json(state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["gateway"], "memory");
    assert_eq!(gw.call_count(), 0);
}

#[tokio::test]
async fn test_tables_listing() {
    let (_, state) = seeded_state();
    let (status, json) = get_json(state, "/tables").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["current"], "n8n_historial");
    assert_eq!(json["tables"][0]["table_name"], "n8n_historial");
    assert_eq!(json["tables"][0]["filters"][4]["type"], "select");
}

#[tokio::test]
async fn test_history_pages() {
    let (_, state) = seeded_state();

    let (status, first) = get_json(state.clone(), "/tables/n8n_historial/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["total_count"], 18);
    assert_eq!(first["total_pages"], 2);
    assert_eq!(first["sessions"].as_array().unwrap().len(), 15);
    assert_eq!(first["sessions"][0]["session_id"], "sess-17");
    assert_eq!(first["sessions"][0]["messages"].as_array().unwrap().len(), 2);

    let (_, second) = get_json(state.clone(), "/history?page=2").await;
    assert_eq!(second["sessions"].as_array().unwrap().len(), 3);
    assert_eq!(second["filters"], json!([["page", "2"]]));

    let (status, third) = get_json(state, "/history?page=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(third["sessions"], json!([]));
}

#[tokio::test]
async fn test_history_special_filter() {
    let (_, state) = seeded_state();
    let (_, json) = get_json(
        state,
        "/tables/n8n_historial/history?special_request=requested&to=2024-03-10",
    )
    .await;
    let ids: Vec<&str> = json["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["session_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["sess-09", "sess-06", "sess-03", "sess-00"]);
    assert!(json["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["positive"] == true));
}

#[tokio::test]
async fn test_unknown_table_is_404() {
    let (_, state) = seeded_state();
    let (status, json) = get_json(state, "/tables/nope/history").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_export_csv_download() {
    let (_, state) = seeded_state();
    let (status, headers, body) = get(state, "/tables/n8n_historial/export?q=radiograf").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"historial_chat_"));
    assert!(disposition.ends_with(".csv\""));

    let csv = String::from_utf8(body).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("session_id,created_at,message_content"));
    // 6 matching sessions, both messages of each
    assert_eq!(lines.clone().count(), 12);
    assert_eq!(
        lines.next(),
        Some("sess-00,2024-03-01T09:00:00Z,\"Humano: ¿Hacen radiografías panorámicas? IA: Sí, de lunes a viernes\"")
    );
    assert_eq!(
        lines.next(),
        Some("sess-00,2024-03-01T09:05:00Z,\"Gracias, \"\"hasta pronto\"\"\"")
    );
}

#[tokio::test]
async fn test_export_empty_and_gateway_failure() {
    let (gw, state) = seeded_state();
    let (status, json) = get_json(state.clone(), "/export?q=ortodoncia").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "empty");

    gw.fail_with("JWT expired");
    let (status, json) = get_json(state, "/export").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("JWT expired"));
}

#[tokio::test]
async fn test_invalid_preset_is_400() {
    let (_, state) = seeded_state();
    let (status, _) = get_json(state, "/history?preset=1y").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stats_and_analytics() {
    let (_, state) = seeded_state();
    let (status, stats) = get_json(state.clone(), "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["cards"][0]["value"], 36);
    assert_eq!(stats["cards"][1]["value"], 18);
    assert_eq!(stats["cards"][2]["value"], "18/3/2024");
    assert_eq!(stats["recent_sessions"].as_array().unwrap().len(), 5);

    let (status, report) = get_json(
        state,
        "/tables/n8n_historial/analytics?from=2024-03-01&to=2024-03-31",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total_sessions"], 18);
    assert_eq!(report["total_messages"], 36);
    assert_eq!(report["positive_sessions"], 6);
    assert_eq!(report["negative_sessions"], 12);
    assert_eq!(report["daily"].as_array().unwrap().len(), 18);
    assert_eq!(report["legend"]["positive"], "Con Solicitud RX");
}

#[tokio::test]
async fn test_no_current_table_is_inert() {
    let gw = Arc::new(MemoryGateway::with_rows("n8n_historial", rows()));
    let mut registry = TableRegistry::builtin();
    registry.clear_selection();
    let state = make_state(gw.clone(), registry);

    let (status, json) = get_json(state.clone(), "/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_count"], 0);

    let (status, json) = get_json(state, "/export").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "empty");
    assert_eq!(gw.call_count(), 0);
}
