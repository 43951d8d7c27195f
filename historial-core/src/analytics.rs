//! Session classification report over a date range.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::error::Result;
use crate::filters::{lower_bound, upper_bound, DatePreset, FilterContext, CREATED_AT_COLUMN};
use crate::gateway::{decode_rows, DataGateway, Query};
use crate::models::{group_by_session, Message, PositiveNegative, TableConfig};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Date window of the report; either side may be open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl AnalyticsRange {
    pub fn new(from: Option<String>, to: Option<String>) -> Self {
        Self {
            from: from.filter(|v| !v.is_empty()),
            to: to.filter(|v| !v.is_empty()),
        }
    }

    pub fn last_days(days: i64, today: NaiveDate) -> Self {
        let from = today - Duration::days(days);
        Self {
            from: Some(from.format("%Y-%m-%d").to_string()),
            to: Some(today.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn preset(preset: DatePreset, today: NaiveDate) -> Self {
        Self::last_days(preset.days(), today)
    }

    fn query(&self, table_name: &str, ctx: &FilterContext) -> Result<Query> {
        let mut query = Query::select_all(table_name);
        if let Some(from) = &self.from {
            query = query.gte(CREATED_AT_COLUMN, lower_bound("from", from, ctx)?);
        }
        if let Some(to) = &self.to {
            query = query.lte(CREATED_AT_COLUMN, upper_bound("to", to, ctx)?);
        }
        Ok(query.order(CREATED_AT_COLUMN, true))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySessions {
    pub date: NaiveDate,
    pub positive: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsReport {
    pub range: AnalyticsRange,
    pub total_sessions: usize,
    pub total_messages: usize,
    pub positive_sessions: usize,
    pub negative_sessions: usize,
    pub legend: PositiveNegative,
    pub colors: PositiveNegative,
    /// Sessions per day of their first message, oldest day first
    pub daily: Vec<DailySessions>,
}

impl AnalyticsReport {
    pub fn empty(range: AnalyticsRange, legend: PositiveNegative, colors: PositiveNegative) -> Self {
        Self {
            range,
            total_sessions: 0,
            total_messages: 0,
            positive_sessions: 0,
            negative_sessions: 0,
            legend,
            colors,
            daily: Vec::new(),
        }
    }

    pub fn compute(table: &TableConfig, range: AnalyticsRange, messages: Vec<Message>) -> Self {
        let classifier = &table.analytics;
        let mut report = Self::empty(range, classifier.legend.clone(), classifier.colors.clone());
        report.total_messages = messages.len();

        let mut daily: BTreeMap<NaiveDate, DailySessions> = BTreeMap::new();
        for (_, session) in group_by_session(messages) {
            let Some(first) = session.iter().map(|m| m.created_at).min() else {
                continue;
            };
            let positive = classifier.is_positive(&session);
            let day = first.date_naive();
            let entry = daily.entry(day).or_insert(DailySessions {
                date: day,
                positive: 0,
                negative: 0,
            });
            report.total_sessions += 1;
            if positive {
                report.positive_sessions += 1;
                entry.positive += 1;
            } else {
                report.negative_sessions += 1;
                entry.negative += 1;
            }
        }
        report.daily = daily.into_values().collect();
        report
    }

    pub async fn load(
        gateway: &dyn DataGateway,
        table: &TableConfig,
        ctx: &FilterContext,
        range: AnalyticsRange,
    ) -> Result<Self> {
        let query = range.query(&table.table_name, ctx)?;
        let messages: Vec<Message> = decode_rows(gateway.fetch(&query).await?)?;
        let report = Self::compute(table, range, messages);
        tracing::debug!(
            table = %table.table_name,
            sessions = report.total_sessions,
            positive = report.positive_sessions,
            "Analytics computed"
        );
        Ok(report)
    }
}
