//! historial-cli: terminal client for a running historial-server
//!
//! # Subcommands
//! - `status`                             : show server and gateway health
//! - `tables`                             : list configured chat tables
//! - `history [filters] [--page N] [--json]`: one page of sessions, newest first
//! - `export [filters] [-o PATH]`         : download the filtered history as CSV

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use historial_core::models::extract_text;
use historial_core::render::{short_session_id, split_transcript};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const PREVIEW_CHARS: usize = 160;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "historial-cli",
    version,
    about = "Browse and export chatbot conversation history"
)]
struct Cli {
    /// Historial HTTP server URL (overrides HISTORIAL_HTTP_URL env var)
    #[arg(long, env = "HISTORIAL_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

/// Filter flags shared by `history` and `export`.
#[derive(Debug, Default, Args)]
struct FilterArgs {
    /// Table id; the server's current table when omitted
    #[arg(long)]
    table: Option<String>,

    /// Text to search in message content
    #[arg(short = 'q', long)]
    query: Option<String>,

    /// Restrict to one session id (substring match)
    #[arg(long)]
    session: Option<String>,

    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// End date (YYYY-MM-DD, inclusive)
    #[arg(long)]
    to: Option<String>,

    /// Date preset: 7d, 30d or 90d
    #[arg(long)]
    preset: Option<String>,

    /// Special-request selection: requested or not_requested
    #[arg(long)]
    special: Option<String>,

    /// Extra `key=value` filter, repeatable
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    extra: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server status
    Status,

    /// List the configured chat tables
    Tables,

    /// Show one page of sessions
    History {
        #[command(flatten)]
        filters: FilterArgs,

        /// Page number, 1-based
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Download the filtered history as CSV
    Export {
        #[command(flatten)]
        filters: FilterArgs,

        /// Output path; the server-suggested file name when omitted
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MessageView {
    pub created_at: String,
    #[serde(default)]
    pub message: Value,
}

#[derive(Debug, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    #[serde(default)]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub positive: bool,
    #[serde(default)]
    pub messages: Vec<MessageView>,
}

/// Body of GET /history
#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub table: Option<String>,
    pub page: u32,
    pub total_count: usize,
    pub total_pages: usize,
    pub sessions: Vec<SessionView>,
}

// ============================================================================
// Request Building
// ============================================================================

/// Query pairs for the filter flags, empty values dropped.
fn filter_pairs(args: &FilterArgs) -> anyhow::Result<Vec<(String, String)>> {
    let named = [
        ("q", &args.query),
        ("session_id", &args.session),
        ("from", &args.from),
        ("to", &args.to),
        ("preset", &args.preset),
        ("special_request", &args.special),
    ];
    let mut pairs: Vec<(String, String)> = named
        .iter()
        .filter_map(|(k, v)| v.as_deref().filter(|v| !v.is_empty()).map(|v| (k.to_string(), v.to_string())))
        .collect();

    for raw in &args.extra {
        let Some((k, v)) = raw.split_once('=') else {
            anyhow::bail!("invalid filter '{}', expected KEY=VALUE", raw);
        };
        if !k.is_empty() && !v.is_empty() {
            pairs.push((k.to_string(), v.to_string()));
        }
    }
    Ok(pairs)
}

/// Endpoint URL for `op`, scoped to a table when one is given.
pub fn endpoint(server: &str, table: Option<&str>, op: &str) -> String {
    match table {
        Some(t) => format!("{}/tables/{}/{}", server, t, op),
        None => format!("{}/{}", server, op),
    }
}

/// File name out of `attachment; filename="..."`.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty() && !name.contains('/') && !name.contains('\\'))
}

// ============================================================================
// Output Formatting
// ============================================================================

fn preview(text: &str) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        flat
    }
}

/// Human-readable block for one session.
pub fn format_session(session: &SessionView) -> String {
    let mut out = format!(
        "Sesión {}  {}  ({} mensajes){}\n",
        short_session_id(&session.session_id),
        session.last_activity.as_deref().unwrap_or("-"),
        session.messages.len(),
        if session.positive { "  ★" } else { "" }
    );
    for msg in &session.messages {
        let text = extract_text(&msg.message);
        match split_transcript(&text) {
            Some(turn) => {
                out.push_str(&format!("  [{}] Humano: {}\n", msg.created_at, preview(&turn.human)));
                out.push_str(&format!("  {:>width$} IA: {}\n", "", preview(&turn.ai), width = msg.created_at.len() + 2));
            }
            None => out.push_str(&format!("  [{}] {}\n", msg.created_at, preview(&text))),
        }
    }
    out
}

pub fn format_page_footer(resp: &HistoryResponse) -> String {
    format!(
        "Página {} de {} · {} sesiones{}",
        resp.page,
        resp.total_pages.max(1),
        resp.total_count,
        resp.table.as_deref().map(|t| format!(" · tabla {}", t)).unwrap_or_default()
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn send(req: reqwest::blocking::RequestBuilder, url: &str) -> reqwest::blocking::Response {
    let resp = match req.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("historial-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        let status = resp.status();
        let body: Value = resp.json().unwrap_or_default();
        let detail = body["error"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .unwrap_or("no details");
        eprintln!("historial-cli: server returned {}: {}", status, detail);
        std::process::exit(1);
    }
    resp
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) => {
            let healthy = r.status().is_success();
            let body: Value = r.json().unwrap_or_default();
            println!("Historial server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
            println!("Gateway:          {}", body["gateway"].as_str().unwrap_or("?"));
            if let Some(backend) = body["backend"].as_str() {
                println!("Backend:          {}", backend);
            }
            if !healthy {
                eprintln!("historial-cli: {}", body["error"].as_str().unwrap_or("server unhealthy"));
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("historial-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn do_tables(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/tables", server);
    let body: Value = send(client(10)?.get(&url), &url).json()?;
    let current = body["current"].as_str();
    for table in body["tables"].as_array().into_iter().flatten() {
        let id = table["id"].as_str().unwrap_or("?");
        println!(
            "{} {:<20} {:<28} {}",
            if Some(id) == current { "*" } else { " " },
            id,
            table["table_name"].as_str().unwrap_or("?"),
            table["name"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

fn do_history(server: &str, filters: &FilterArgs, page: u32, json_output: bool) -> anyhow::Result<()> {
    let url = endpoint(server, filters.table.as_deref(), "history");
    let mut pairs = filter_pairs(filters)?;
    if page > 1 {
        pairs.push(("page".to_string(), page.to_string()));
    }
    let resp = send(client(30)?.get(&url).query(&pairs), &url);

    if json_output {
        let body: Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let history: HistoryResponse = match resp.json() {
        Ok(h) => h,
        Err(e) => {
            eprintln!("historial-cli: failed to parse history response: {}", e);
            std::process::exit(1);
        }
    };
    if history.sessions.is_empty() {
        eprintln!("No se encontraron sesiones.");
        return Ok(());
    }
    for session in &history.sessions {
        println!("{}", format_session(session));
    }
    println!("{}", format_page_footer(&history));
    Ok(())
}

fn do_export(server: &str, filters: &FilterArgs, output: Option<&Path>) -> anyhow::Result<()> {
    let url = endpoint(server, filters.table.as_deref(), "export");
    let pairs = filter_pairs(filters)?;
    let resp = send(client(120)?.get(&url).query(&pairs), &url);

    let suggested = resp
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| "historial_chat.csv".to_string());
    let path = output.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(suggested));

    let content = resp.text()?;
    std::fs::write(&path, &content)?;
    let rows = content.lines().count().saturating_sub(1);
    println!("Exported {} rows to {}", rows, path.display());
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Tables => do_tables(&server),
        Commands::History { filters, page, json } => do_history(&server, &filters, page, json),
        Commands::Export { filters, output } => do_export(&server, &filters, output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("historial-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(messages: Value) -> SessionView {
        serde_json::from_value(json!({
            "session_id": "0f3c9a2e-77b1-4d2a-9c1e-5b8d4e2a91f7",
            "last_activity": "2024-03-05T09:05:00Z",
            "positive": true,
            "messages": messages,
        }))
        .unwrap()
    }

    #[test]
    fn test_filter_pairs_drop_empty_values() {
        let args = FilterArgs {
            query: Some("radiograf".into()),
            from: Some(String::new()),
            special: Some("requested".into()),
            extra: vec!["canal=whatsapp".into(), "vacio=".into()],
            ..Default::default()
        };
        let pairs = filter_pairs(&args).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("q".to_string(), "radiograf".to_string()),
                ("special_request".to_string(), "requested".to_string()),
                ("canal".to_string(), "whatsapp".to_string()),
            ]
        );
    }

    #[test]
    fn test_filter_pairs_reject_malformed_extra() {
        let args = FilterArgs {
            extra: vec!["sin-igual".into()],
            ..Default::default()
        };
        assert!(filter_pairs(&args).is_err());
    }

    #[test]
    fn test_endpoint_scoping() {
        assert_eq!(endpoint("http://h:1", None, "history"), "http://h:1/history");
        assert_eq!(
            endpoint("http://h:1", Some("n8n_historial"), "export"),
            "http://h:1/tables/n8n_historial/export"
        );
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"historial_chat_2024-03-05.csv\""),
            Some("historial_chat_2024-03-05.csv".to_string())
        );
        assert_eq!(filename_from_disposition("attachment"), None);
        assert_eq!(filename_from_disposition("attachment; filename=\"../x.csv\""), None);
    }

    #[test]
    fn test_format_session_splits_transcript() {
        let s = session(json!([
            {"created_at": "2024-03-05T09:00:00Z", "message": {"type": "human", "text": "Humano: ¿Abren el sábado? IA: Sí, hasta las 13h"}},
            {"created_at": "2024-03-05T09:05:00Z", "message": "gracias\nadiós"},
        ]));
        let out = format_session(&s);
        assert!(out.starts_with("Sesión ...2a91f7  2024-03-05T09:05:00Z"));
        assert!(out.contains("(2 mensajes)  ★"));
        assert!(out.contains("Humano: ¿Abren el sábado?"));
        assert!(out.contains("IA: Sí, hasta las 13h"));
        assert!(out.contains("[2024-03-05T09:05:00Z] gracias adiós"));
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "a".repeat(PREVIEW_CHARS + 10);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn test_history_response_parses_server_shape() {
        let body = json!({
            "table": "n8n_historial",
            "page": 2,
            "page_size": 15,
            "total_count": 18,
            "total_pages": 2,
            "filters": [["page", "2"]],
            "sessions": [{
                "session_id": "sess-02",
                "messages": [{"id": 4, "session_id": "sess-02", "created_at": "2024-03-03T09:00:00Z", "message": null}],
                "last_activity": "2024-03-03T09:00:00Z",
                "positive": false
            }]
        });
        let resp: HistoryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.sessions.len(), 1);
        assert_eq!(format_page_footer(&resp), "Página 2 de 2 · 18 sesiones · tabla n8n_historial");
        assert!(format_session(&resp.sessions[0]).contains("[2024-03-03T09:00:00Z] \n"));
    }
}
