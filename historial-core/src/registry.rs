use crate::config::HistorialConfig;
use crate::error::{HistorialError, Result};
use crate::gateway::{validate_ident, ColumnPath};
use crate::models::{
    AnalyticsConfig, ColumnConfig, ColumnRender, FilterConfig, FilterKind, MatchKind,
    PositiveNegative, SelectOption, StatConfig, StatMetric, TableConfig,
};

/// Table configurations known to this process; one of them is current.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: Vec<TableConfig>,
    current: Option<String>,
}

impl TableRegistry {
    pub fn new(tables: Vec<TableConfig>) -> Result<Self> {
        for table in &tables {
            validate(table)?;
        }
        let current = tables.first().map(|t| t.id.clone());
        Ok(Self { tables, current })
    }

    pub fn builtin() -> Self {
        Self {
            current: Some(N8N_HISTORIAL_ID.to_string()),
            tables: vec![n8n_historial()],
        }
    }

    /// Built-in tables plus `[[tables]]` from the config file (same id replaces).
    pub fn from_config(config: &HistorialConfig) -> Result<Self> {
        let mut tables = vec![n8n_historial()];
        for table in &config.tables {
            match tables.iter_mut().find(|t| t.id == table.id) {
                Some(existing) => *existing = table.clone(),
                None => tables.push(table.clone()),
            }
        }
        let mut registry = Self::new(tables)?;
        if let Some(default_table) = &config.history.default_table {
            registry.select(default_table)?;
        }
        tracing::info!(
            tables = registry.tables.len(),
            current = registry.current.as_deref().unwrap_or("-"),
            "Table registry loaded"
        );
        Ok(registry)
    }

    pub fn list(&self) -> &[TableConfig] {
        &self.tables
    }

    pub fn get(&self, id: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&TableConfig> {
        self.get(id)
            .ok_or_else(|| HistorialError::UnknownTable(id.to_string()))
    }

    pub fn current(&self) -> Option<&TableConfig> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        self.require(id)?;
        self.current = Some(id.to_string());
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.current = None;
    }
}

fn invalid(table: &TableConfig, reason: impl Into<String>) -> HistorialError {
    HistorialError::InvalidTable {
        table: table.id.clone(),
        reason: reason.into(),
    }
}

/// Reject configurations the pipeline cannot evaluate.
pub fn validate(table: &TableConfig) -> Result<()> {
    validate_ident(&table.table_name).map_err(|e| invalid(table, e.to_string()))?;

    let selects: Vec<&FilterConfig> = table
        .filters
        .iter()
        .filter(|f| f.kind == FilterKind::Select)
        .collect();
    if selects.len() > 1 {
        return Err(invalid(table, "at most one select filter is supported"));
    }
    if let Some(select) = selects.first() {
        let strategy = select.strategy().ok_or_else(|| {
            invalid(
                table,
                format!("select filter '{}' needs db_column/db_column_type (and db_match_string for text_match)", select.id),
            )
        })?;
        ColumnPath::parse(strategy.column()).map_err(|e| invalid(table, e.to_string()))?;
    }

    for filter in table.filters.iter().filter(|f| f.kind == FilterKind::Text) {
        if filter.id != crate::filters::SEARCH_FILTER_ID {
            ColumnPath::parse(&filter.id).map_err(|e| invalid(table, e.to_string()))?;
        }
    }

    if table.analytics.strategy().is_none() {
        return Err(invalid(table, "analytics classifier is incomplete"));
    }
    ColumnPath::parse(&table.analytics.filter_column).map_err(|e| invalid(table, e.to_string()))?;

    if table.columns.iter().filter(|c| c.is_primary).count() > 1 {
        return Err(invalid(table, "only one column may be primary"));
    }
    Ok(())
}

pub const N8N_HISTORIAL_ID: &str = "n8n_historial";

/// Chat memory table written by the clinic's n8n workflow.
pub fn n8n_historial() -> TableConfig {
    TableConfig {
        id: N8N_HISTORIAL_ID.to_string(),
        name: "Historial de Interacción Chatbot Clínica Dental Yany".to_string(),
        table_name: "n8n_historial".to_string(),
        columns: vec![
            ColumnConfig {
                id: "message".to_string(),
                header: "Mensaje".to_string(),
                accessor: "message".to_string(),
                is_primary: true,
                render: ColumnRender::Message,
                class_name: None,
            },
            ColumnConfig {
                id: "session_id".to_string(),
                header: "ID Sesión".to_string(),
                accessor: "session_id".to_string(),
                is_primary: false,
                render: ColumnRender::ShortId,
                class_name: None,
            },
            ColumnConfig {
                id: "created_at".to_string(),
                header: "Fecha".to_string(),
                accessor: "created_at".to_string(),
                is_primary: false,
                render: ColumnRender::DateTime,
                class_name: None,
            },
            ColumnConfig {
                id: "rx_request".to_string(),
                header: "Solicitud RX".to_string(),
                accessor: "session_id".to_string(),
                is_primary: false,
                render: ColumnRender::SessionFlag,
                class_name: Some("text-center".to_string()),
            },
        ],
        filters: vec![
            FilterConfig {
                id: "q".to_string(),
                label: "Buscar en mensajes...".to_string(),
                kind: FilterKind::Text,
                options: vec![],
                db_column: None,
                db_column_type: None,
                db_match_string: None,
            },
            FilterConfig {
                id: "session_id".to_string(),
                label: "Filtrar por ID de Sesión...".to_string(),
                kind: FilterKind::Text,
                options: vec![],
                db_column: None,
                db_column_type: None,
                db_match_string: None,
            },
            FilterConfig {
                id: "from".to_string(),
                label: "Desde".to_string(),
                kind: FilterKind::Date,
                options: vec![],
                db_column: None,
                db_column_type: None,
                db_match_string: None,
            },
            FilterConfig {
                id: "to".to_string(),
                label: "Hasta".to_string(),
                kind: FilterKind::Date,
                options: vec![],
                db_column: None,
                db_column_type: None,
                db_match_string: None,
            },
            FilterConfig {
                id: "special_request".to_string(),
                label: "Solicitud RX".to_string(),
                kind: FilterKind::Select,
                options: vec![
                    SelectOption {
                        value: "requested".to_string(),
                        label: "Solicitadas".to_string(),
                    },
                    SelectOption {
                        value: "not_requested".to_string(),
                        label: "No Solicitadas".to_string(),
                    },
                ],
                db_column: Some("message->>text".to_string()),
                db_column_type: Some(MatchKind::TextMatch),
                db_match_string: Some("radiograf".to_string()),
            },
        ],
        stats: vec![
            StatConfig {
                id: "totalMessages".to_string(),
                title: "Mensajes Totales".to_string(),
                metric: StatMetric::TotalMessages,
            },
            StatConfig {
                id: "totalSessions".to_string(),
                title: "Sesiones Totales".to_string(),
                metric: StatMetric::TotalSessions,
            },
            StatConfig {
                id: "lastMessage".to_string(),
                title: "Último Mensaje".to_string(),
                metric: StatMetric::LastMessage,
            },
        ],
        analytics: AnalyticsConfig {
            legend: PositiveNegative {
                positive: "Con Solicitud RX".to_string(),
                negative: "Sin Solicitud RX".to_string(),
            },
            colors: PositiveNegative {
                positive: "#10B981".to_string(),
                negative: "#3B82F6".to_string(),
            },
            filter_column: "message->>text".to_string(),
            filter_type: MatchKind::TextMatch,
            filter_match_string: Some("radiograf".to_string()),
        },
    }
}
