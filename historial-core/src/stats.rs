//! Dashboard stat cards and recent sessions over a whole table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::filters::{FilterContext, CREATED_AT_COLUMN, SESSION_ID_COLUMN};
use crate::gateway::{decode_rows, DataGateway, Query};
use crate::models::{CandidateRow, StatMetric, TableConfig};

pub const RECENT_SESSIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatCard {
    pub id: String,
    pub title: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub cards: Vec<StatCard>,
    pub recent_sessions: Vec<SessionSummary>,
}

impl DashboardStats {
    /// Cards and recent sessions over `(session_id, created_at)` rows.
    pub fn compute(table: &TableConfig, rows: &[CandidateRow], ctx: &FilterContext) -> Self {
        let mut summaries: HashMap<&str, SessionSummary> = HashMap::new();
        for row in rows {
            summaries
                .entry(row.session_id.as_str())
                .and_modify(|s| {
                    s.message_count += 1;
                    s.last_message_at = s.last_message_at.max(row.created_at);
                })
                .or_insert_with(|| SessionSummary {
                    session_id: row.session_id.clone(),
                    message_count: 1,
                    last_message_at: row.created_at,
                });
        }
        let total_sessions = summaries.len();

        let cards = table
            .stats
            .iter()
            .map(|stat| {
                let value = match stat.metric {
                    StatMetric::TotalMessages => Value::from(rows.len()),
                    StatMetric::TotalSessions => Value::from(total_sessions),
                    StatMetric::LastMessage => Value::from(
                        rows.iter()
                            .map(|r| r.created_at)
                            .max()
                            .map(|ts| ts.with_timezone(&ctx.utc_offset()).format("%-d/%-m/%Y").to_string())
                            .unwrap_or_else(|| "N/A".to_string()),
                    ),
                };
                StatCard {
                    id: stat.id.clone(),
                    title: stat.title.clone(),
                    value,
                }
            })
            .collect();

        let mut recent_sessions: Vec<SessionSummary> = summaries.into_values().collect();
        recent_sessions.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        recent_sessions.truncate(RECENT_SESSIONS);

        Self {
            cards,
            recent_sessions,
        }
    }

    pub async fn load(gateway: &dyn DataGateway, table: &TableConfig, ctx: &FilterContext) -> Result<Self> {
        let query = Query::select(&table.table_name, &[SESSION_ID_COLUMN, CREATED_AT_COLUMN])
            .order(CREATED_AT_COLUMN, false);
        let rows: Vec<CandidateRow> = decode_rows(gateway.fetch(&query).await?)?;
        tracing::debug!(table = %table.table_name, rows = rows.len(), "Dashboard rows loaded");
        Ok(Self::compute(table, &rows, ctx))
    }
}
