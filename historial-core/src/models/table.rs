use serde::{Deserialize, Serialize};

use super::Message;
use crate::gateway::{ColumnPath, Constraint};

/// Declarative description of one backend table served by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: String,
    pub name: String,
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub stats: Vec<StatConfig>,
    pub analytics: AnalyticsConfig,
}

impl TableConfig {
    pub fn filter(&self, id: &str) -> Option<&FilterConfig> {
        self.filters.iter().find(|f| f.id == id)
    }

    /// The `select` filter, if any (at most one after registry validation).
    pub fn special_filter(&self) -> Option<&FilterConfig> {
        self.filters.iter().find(|f| f.kind == FilterKind::Select)
    }

    /// The expandable column; falls back to the first one.
    pub fn primary_column(&self) -> Option<&ColumnConfig> {
        self.columns
            .iter()
            .find(|c| c.is_primary)
            .or_else(|| self.columns.first())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRender {
    #[default]
    Plain,
    /// Payload text, split into user/AI parts when possible
    Message,
    /// Last six characters of the id
    ShortId,
    DateTime,
    /// Session-level analytics flag
    SessionFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub id: String,
    pub header: String,
    /// Column path read from each row; ignored for `session_flag`.
    pub accessor: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub render: ColumnRender,
    #[serde(default)]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Text,
    Date,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Boolean,
    TextMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    #[serde(default)]
    pub options: Vec<SelectOption>,
    #[serde(default)]
    pub db_column: Option<String>,
    #[serde(default)]
    pub db_column_type: Option<MatchKind>,
    #[serde(default)]
    pub db_match_string: Option<String>,
}

impl FilterConfig {
    /// Backend strategy of a `select` filter; `None` when incompletely declared.
    pub fn strategy(&self) -> Option<MatchStrategy> {
        MatchStrategy::from_parts(
            self.db_column_type?,
            self.db_column.as_deref()?,
            self.db_match_string.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatMetric {
    TotalMessages,
    TotalSessions,
    LastMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatConfig {
    pub id: String,
    pub title: String,
    pub metric: StatMetric,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositiveNegative {
    pub positive: String,
    pub negative: String,
}

/// Session classifier shared by the analytics view and the history flag column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub legend: PositiveNegative,
    pub colors: PositiveNegative,
    pub filter_column: String,
    pub filter_type: MatchKind,
    #[serde(default)]
    pub filter_match_string: Option<String>,
}

impl AnalyticsConfig {
    pub fn strategy(&self) -> Option<MatchStrategy> {
        MatchStrategy::from_parts(
            self.filter_type,
            &self.filter_column,
            self.filter_match_string.as_deref(),
        )
    }

    /// A session is positive when any of its messages matches.
    pub fn is_positive(&self, messages: &[Message]) -> bool {
        match self.strategy() {
            Some(strategy) => messages.iter().any(|m| strategy.matches(m)),
            None => false,
        }
    }
}

/// How a boolean-like classifier is evaluated, both server-side (as a
/// constraint) and client-side (over fetched messages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStrategy {
    Boolean { column: String },
    TextMatch { column: String, needle: String },
}

impl MatchStrategy {
    pub fn from_parts(kind: MatchKind, column: &str, needle: Option<&str>) -> Option<Self> {
        if column.is_empty() {
            return None;
        }
        match kind {
            MatchKind::Boolean => Some(MatchStrategy::Boolean {
                column: column.to_string(),
            }),
            MatchKind::TextMatch => needle.filter(|n| !n.is_empty()).map(|n| MatchStrategy::TextMatch {
                column: column.to_string(),
                needle: n.to_string(),
            }),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            MatchStrategy::Boolean { column } | MatchStrategy::TextMatch { column, .. } => column,
        }
    }

    pub fn constraint(&self) -> Constraint {
        match self {
            MatchStrategy::Boolean { column } => Constraint::Eq {
                column: column.clone(),
                value: serde_json::Value::Bool(true),
            },
            MatchStrategy::TextMatch { column, needle } => Constraint::contains(column.clone(), needle),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        let Ok(path) = ColumnPath::parse(self.column()) else {
            return false;
        };
        match self {
            MatchStrategy::Boolean { .. } => {
                message.value_at(&path) == Some(serde_json::Value::Bool(true))
            }
            MatchStrategy::TextMatch { needle, .. } => message
                .text_at(&path)
                .map(|t| t.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
        }
    }
}
