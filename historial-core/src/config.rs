use chrono::FixedOffset;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::filters::FilterContext;
use crate::models::TableConfig;

/// Environment variables consulted, in order, when `gateway.api_key` is unset.
pub const API_KEY_ENV_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "SUPABASE_KEY"];

#[derive(Debug, Deserialize, Clone)]
pub struct HistorialConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GatewayBackend {
    /// PostgREST / Supabase REST endpoint
    #[default]
    Rest,
    /// Direct Postgres connection
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default)]
    pub backend: GatewayBackend,
    /// Project URL for `rest`, connection string for `postgres`.
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Rows requested per round trip; PostgREST caps responses server-side.
    #[serde(default = "default_page_rows")]
    pub page_rows: usize,
    /// Unique column appended to the order of every paged read.
    #[serde(default = "default_paging_key")]
    pub paging_key: String,
    /// Maximum session ids sent in a single `in` list.
    #[serde(default = "default_in_chunk_size")]
    pub in_chunk_size: usize,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}

fn default_page_rows() -> usize {
    1000
}

fn default_paging_key() -> String {
    "id".to_string()
}

fn default_in_chunk_size() -> usize {
    200
}

impl GatewayConfig {
    pub fn rest(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            backend: GatewayBackend::Rest,
            url: url.into(),
            api_key: Some(api_key.into()),
            schema: default_schema(),
            timeout_seconds: default_timeout_seconds(),
            max_connections: default_max_connections(),
            page_rows: default_page_rows(),
            paging_key: default_paging_key(),
            in_chunk_size: default_in_chunk_size(),
        }
    }

    /// API key from the file, falling back to the Supabase environment variables.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                API_KEY_ENV_VARS
                    .iter()
                    .find_map(|name| std::env::var(name).ok().filter(|k| !k.is_empty()))
            })
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HistoryConfig {
    /// Local offset used to pin the end of a `to` day to 23:59:59.999.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub default_table: Option<String>,
}

impl HistoryConfig {
    pub fn filter_context(&self) -> Result<FilterContext, ConfigError> {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Message(format!(
                "history.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })?;
        Ok(FilterContext::new(offset))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

impl HistorialConfig {
    /// Load from a TOML file; `HISTORIAL__SECTION__KEY` variables override file values.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("HISTORIAL").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
