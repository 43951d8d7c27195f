//! Remote data gateway: read access to the backend message tables
//!
//! Provides a `DataGateway` trait with implementations for:
//! - **REST**: PostgREST / Supabase (`/rest/v1/{table}`) over reqwest
//! - **Postgres**: direct connection via sqlx, same operator semantics
//! - **Memory**: in-process rows, used as the fake backend in tests

mod column;
mod memory;
mod postgres;
mod query;
mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{GatewayBackend, GatewayConfig};

pub use column::{quote_ident, validate_ident, ColumnPath};
pub use memory::MemoryGateway;
pub use postgres::{create_pool, PgGateway};
pub use query::{ilike_matches, Constraint, Order, Query};
pub use rest::RestGateway;

/// Errors raised by any backend call. Never retried by the callers.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid column reference: {0}")]
    InvalidColumn(String),

    #[error("Invalid row: {0}")]
    Decode(String),

    #[error("Missing API key")]
    MissingApiKey,
}

impl GatewayError {
    pub fn decode(err: impl std::fmt::Display) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Abstraction over the table store.
#[async_trait]
pub trait DataGateway: Send + Sync {
    /// Execute a query and return every matching row as a JSON object.
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, GatewayError>;

    /// Cheap reachability probe; returns a human-readable backend description.
    async fn ping(&self) -> Result<String, GatewayError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Decode gateway rows into a typed projection.
pub fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, GatewayError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(GatewayError::decode))
        .collect()
}

/// Build the configured gateway once at process start.
pub async fn connect(config: &GatewayConfig) -> Result<Arc<dyn DataGateway>, GatewayError> {
    match config.backend {
        GatewayBackend::Rest => Ok(Arc::new(RestGateway::new(config)?)),
        GatewayBackend::Postgres => Ok(Arc::new(PgGateway::connect(config).await?)),
    }
}
