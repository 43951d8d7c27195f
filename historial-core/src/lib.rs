pub mod analytics;
pub mod config;
pub mod error;
pub mod export;
pub mod filters;
pub mod gateway;
pub mod models;
pub mod paginator;
pub mod registry;
pub mod render;
pub mod resolver;
pub mod service;
pub mod stats;
pub mod view;

pub use config::HistorialConfig;
pub use error::{HistorialError, Result};
pub use export::{CsvExport, ExportAssembler, ExportOutcome};
pub use filters::{DatePreset, FilterContext, FilterSet};
pub use gateway::{
    connect, Constraint, DataGateway, GatewayError, MemoryGateway, PgGateway, Query, RestGateway,
};
pub use models::{Message, MessagePayload, Session, TableConfig};
pub use paginator::{SessionPage, SessionPaginator, PAGE_SIZE};
pub use registry::TableRegistry;
pub use resolver::{ResolvedSessions, SessionResolver};
pub use service::HistoryService;
pub use view::{HistoryView, RequestSequencer, RequestTicket};
