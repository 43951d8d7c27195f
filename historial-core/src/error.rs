use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Error, Debug)]
pub enum HistorialError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid table configuration '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("Invalid value for filter '{id}': {value}")]
    InvalidFilter { id: String, value: String },

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T, E = HistorialError> = std::result::Result<T, E>;
