//! Session resolution: which sessions match the current filters, newest first.
//!
//! Works on `(session_id, created_at)` projections only; message bodies are
//! fetched later by the paginator or the export assembler.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::filters::{candidate_query, special_selection, FilterContext, FilterSet, SpecialMode};
use crate::gateway::{decode_rows, DataGateway};
use crate::models::{CandidateRow, SessionIdRow, TableConfig};

/// Ordered, de-duplicated session ids plus the timestamp each was ranked by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSessions {
    ordered: Vec<String>,
    last_activity: HashMap<String, DateTime<Utc>>,
}

impl ResolvedSessions {
    pub fn ids(&self) -> &[String] {
        &self.ordered
    }

    pub fn into_ids(self) -> Vec<String> {
        self.ordered
    }

    pub fn total_count(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn last_activity(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.last_activity.get(session_id).copied()
    }
}

pub struct SessionResolver<'a> {
    gateway: &'a dyn DataGateway,
    table: &'a TableConfig,
    ctx: FilterContext,
}

impl<'a> SessionResolver<'a> {
    pub fn new(gateway: &'a dyn DataGateway, table: &'a TableConfig, ctx: FilterContext) -> Self {
        Self { gateway, table, ctx }
    }

    /// Step 1 and 2: candidate rows collapsed to the newest timestamp per session.
    pub async fn candidate_sessions(&self, filters: &FilterSet) -> Result<HashMap<String, DateTime<Utc>>> {
        let query = candidate_query(self.table, filters, &self.ctx)?;
        let rows: Vec<CandidateRow> = decode_rows(self.gateway.fetch(&query).await?)?;
        let candidates = aggregate_last_activity(rows);
        tracing::debug!(
            table = %self.table.table_name,
            candidates = candidates.len(),
            "Candidate sessions resolved"
        );
        Ok(candidates)
    }

    /// Session ids with at least one row matching `strategy`, regardless of other filters.
    pub async fn positive_sessions(&self, query: &crate::gateway::Query) -> Result<HashSet<String>> {
        let rows: Vec<SessionIdRow> = decode_rows(self.gateway.fetch(query).await?)?;
        Ok(rows.into_iter().map(|r| r.session_id).collect())
    }

    /// Steps 1 to 3: the final session set, unordered.
    pub async fn final_sessions(&self, filters: &FilterSet) -> Result<HashMap<String, DateTime<Utc>>> {
        let candidates = self.candidate_sessions(filters).await?;

        let Some(selection) = special_selection(self.table, filters) else {
            return Ok(candidates);
        };
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let positive = self
            .positive_sessions(&selection.positive_query(self.table))
            .await?;
        let refined = refine(candidates, &positive, selection.mode);
        tracing::debug!(
            filter = %selection.filter_id,
            mode = ?selection.mode,
            positive = positive.len(),
            remaining = refined.len(),
            "Special filter applied"
        );
        Ok(refined)
    }

    /// Full resolution, ordered newest activity first.
    pub async fn resolve(&self, filters: &FilterSet) -> Result<ResolvedSessions> {
        let last_activity = self.final_sessions(filters).await?;
        let ordered = order_sessions(&last_activity);
        Ok(ResolvedSessions {
            ordered,
            last_activity,
        })
    }
}

pub fn aggregate_last_activity(rows: impl IntoIterator<Item = CandidateRow>) -> HashMap<String, DateTime<Utc>> {
    let mut latest: HashMap<String, DateTime<Utc>> = HashMap::new();
    for row in rows {
        latest
            .entry(row.session_id)
            .and_modify(|ts| *ts = (*ts).max(row.created_at))
            .or_insert(row.created_at);
    }
    latest
}

pub fn refine(
    mut candidates: HashMap<String, DateTime<Utc>>,
    positive: &HashSet<String>,
    mode: SpecialMode,
) -> HashMap<String, DateTime<Utc>> {
    candidates.retain(|id, _| match mode {
        SpecialMode::Requested => positive.contains(id),
        SpecialMode::NotRequested => !positive.contains(id),
    });
    candidates
}

/// Descending by timestamp; equal timestamps by session id ascending.
pub fn order_sessions(last_activity: &HashMap<String, DateTime<Utc>>) -> Vec<String> {
    let mut entries: Vec<(&String, &DateTime<Utc>)> = last_activity.iter().collect();
    entries.sort_by(|(id_a, ts_a), (id_b, ts_b)| ts_b.cmp(ts_a).then_with(|| id_a.cmp(id_b)));
    entries.into_iter().map(|(id, _)| id.clone()).collect()
}
