//! Filter state and the shared predicate builder
//!
//! The history view and the CSV export both build their backend constraints
//! here, so the exported population always equals the browsed one.
//!
//! Rules:
//! - empty values and `all` are never sent
//! - `text` filters become `ilike %value%`; `q` targets `message->>text`,
//!   every other text filter its own column
//! - `date` filters whose id contains `from` are an inclusive lower bound,
//!   ids containing `to` an upper bound pinned to 23:59:59.999 local time
//! - the single `select` filter is resolved separately (`special_selection`)

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

use crate::error::{HistorialError, Result};
use crate::gateway::{Constraint, Query};
use crate::models::{FilterKind, MatchStrategy, TableConfig};

pub const ALL: &str = "all";
pub const REQUESTED: &str = "requested";
pub const PAGE_PARAM: &str = "page";
pub const SEARCH_FILTER_ID: &str = "q";
pub const PAYLOAD_TEXT_COLUMN: &str = "message->>text";
pub const SESSION_ID_COLUMN: &str = "session_id";
pub const CREATED_AT_COLUMN: &str = "created_at";

/// Current filter values plus the 1-based page number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    values: BTreeMap<String, String>,
    page: u32,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterSet {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            page: 1,
        }
    }

    /// Rebuild filter state from URL query parameters.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::new();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key == PAGE_PARAM {
                set.page = value.trim().parse().ok().filter(|p| *p >= 1).unwrap_or(1);
            } else if !value.is_empty() {
                set.values.insert(key.to_string(), value.to_string());
            }
        }
        set
    }

    /// URL query parameters for this state; `page=1` is the default and is omitted.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if self.page != 1 {
            pairs.push((PAGE_PARAM.to_string(), self.page.to_string()));
        }
        pairs
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    /// Raw value, if present.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.values.get(id).map(String::as_str)
    }

    /// Value that constrains the query: non-empty and not `all`.
    pub fn active(&self, id: &str) -> Option<&str> {
        self.get(id).filter(|v| !v.is_empty() && *v != ALL)
    }

    /// Change one filter. Anything but the page number resets the page to 1.
    pub fn set(&mut self, id: &str, value: impl Into<String>) {
        let value = value.into();
        if id == PAGE_PARAM {
            self.set_page(value.trim().parse().unwrap_or(1));
            return;
        }
        if value.is_empty() {
            self.values.remove(id);
        } else {
            self.values.insert(id.to_string(), value);
        }
        self.page = 1;
    }

    pub fn with(mut self, id: &str, value: impl Into<String>) -> Self {
        self.set(id, value);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.set_page(page);
        self
    }

    /// Same filters, page 1. Used where pagination does not apply.
    pub fn without_page(&self) -> Self {
        Self {
            values: self.values.clone(),
            page: 1,
        }
    }

    /// Set `from`/`to` to the preset window ending `today`.
    pub fn apply_preset(&mut self, preset: DatePreset, today: NaiveDate) {
        let from = today - Duration::days(preset.days());
        self.values.insert("from".to_string(), from.format("%Y-%m-%d").to_string());
        self.values.insert("to".to_string(), today.format("%Y-%m-%d").to_string());
        self.page = 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatePreset {
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
}

impl DatePreset {
    pub fn days(self) -> i64 {
        match self {
            DatePreset::Last7Days => 7,
            DatePreset::Last30Days => 30,
            DatePreset::Last90Days => 90,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatePreset::Last7Days => "7d",
            DatePreset::Last30Days => "30d",
            DatePreset::Last90Days => "90d",
        }
    }
}

impl FromStr for DatePreset {
    type Err = HistorialError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "7d" => Ok(DatePreset::Last7Days),
            "30d" => Ok(DatePreset::Last30Days),
            "90d" => Ok(DatePreset::Last90Days),
            other => Err(HistorialError::InvalidFilter {
                id: "preset".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Per-deployment settings the predicate builder needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterContext {
    utc_offset: FixedOffset,
}

impl Default for FilterContext {
    fn default() -> Self {
        Self::utc()
    }
}

impl FilterContext {
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self { utc_offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Calendar date "today" in the configured offset.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.utc_offset).date_naive()
    }
}

fn invalid(id: &str, value: &str) -> HistorialError {
    HistorialError::InvalidFilter {
        id: id.to_string(),
        value: value.to_string(),
    }
}

/// Inclusive lower bound. A bare date is midnight UTC; a date-time without
/// offset is read in the configured local offset.
pub fn lower_bound(id: &str, value: &str, ctx: &FilterContext) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    parse_instant(value, ctx).ok_or_else(|| invalid(id, value))
}

/// Inclusive upper bound covering the whole local day of `value`.
pub fn upper_bound(id: &str, value: &str, ctx: &FilterContext) -> Result<DateTime<Utc>> {
    let value = value.trim();
    let date = match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => parse_instant(value, ctx)
            .ok_or_else(|| invalid(id, value))?
            .with_timezone(&ctx.utc_offset)
            .date_naive(),
    };
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).ok_or_else(|| invalid(id, value))?;
    ctx.utc_offset
        .from_local_datetime(&date.and_time(end_of_day))
        .single()
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| invalid(id, value))
}

fn parse_instant(value: &str, ctx: &FilterContext) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| ctx.utc_offset.from_local_datetime(&naive).single())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Constraints of the candidate query (text and date filters).
pub fn candidate_constraints(
    table: &TableConfig,
    filters: &FilterSet,
    ctx: &FilterContext,
) -> Result<Vec<Constraint>> {
    let mut constraints = Vec::new();

    for filter in &table.filters {
        let Some(value) = filters.active(&filter.id) else {
            continue;
        };
        match filter.kind {
            FilterKind::Text => {
                let column = if filter.id == SEARCH_FILTER_ID {
                    PAYLOAD_TEXT_COLUMN
                } else {
                    filter.id.as_str()
                };
                constraints.push(Constraint::contains(column, value));
            }
            FilterKind::Date => {
                if filter.id.contains("from") {
                    constraints.push(Constraint::Gte {
                        column: CREATED_AT_COLUMN.to_string(),
                        value: lower_bound(&filter.id, value, ctx)?,
                    });
                } else if filter.id.contains("to") {
                    constraints.push(Constraint::Lte {
                        column: CREATED_AT_COLUMN.to_string(),
                        value: upper_bound(&filter.id, value, ctx)?,
                    });
                }
            }
            FilterKind::Select => {}
        }
    }

    Ok(constraints)
}

/// `(session_id, created_at)` rows matching the text/date filters.
pub fn candidate_query(table: &TableConfig, filters: &FilterSet, ctx: &FilterContext) -> Result<Query> {
    Ok(Query::select(&table.table_name, &[SESSION_ID_COLUMN, CREATED_AT_COLUMN])
        .filters(candidate_constraints(table, filters, ctx)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialMode {
    /// Keep sessions in the positive set
    Requested,
    /// Drop sessions in the positive set
    NotRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialSelection {
    pub filter_id: String,
    pub strategy: MatchStrategy,
    pub mode: SpecialMode,
}

impl SpecialSelection {
    /// Session ids of every row matching the strategy. Deliberately ignores
    /// the text/date filters: the positive set is table-wide.
    pub fn positive_query(&self, table: &TableConfig) -> Query {
        Query::select(&table.table_name, &[SESSION_ID_COLUMN]).filter(self.strategy.constraint())
    }
}

/// The special filter refinement requested by `filters`, if any.
pub fn special_selection(table: &TableConfig, filters: &FilterSet) -> Option<SpecialSelection> {
    let filter = table.special_filter()?;
    let value = filters.active(&filter.id)?;
    let Some(strategy) = filter.strategy() else {
        tracing::warn!(filter = %filter.id, "Select filter has no backend strategy; ignoring");
        return None;
    };
    let mode = if value == REQUESTED {
        SpecialMode::Requested
    } else {
        SpecialMode::NotRequested
    };
    Some(SpecialSelection {
        filter_id: filter.id.clone(),
        strategy,
        mode,
    })
}
