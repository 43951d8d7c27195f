use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ilike_matches, ColumnPath, Constraint, DataGateway, GatewayError, Query};
use crate::models::message::parse_timestamp;

/// In-process table store with PostgREST operator semantics.
///
/// Records every executed query so tests can assert on round trips, and can
/// be switched into a failing mode to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    calls: Mutex<Vec<Query>>,
    failure: Mutex<Option<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(table: &str, rows: Vec<Value>) -> Self {
        let gw = Self::new();
        gw.insert_rows(table, rows);
        gw
    }

    pub fn insert_rows(&self, table: &str, rows: Vec<Value>) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Queries executed so far, in order.
    pub fn calls(&self) -> Vec<Query> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make every subsequent call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.failure) = Some(message.into());
    }

    pub fn recover(&self) {
        *lock(&self.failure) = None;
    }

    /// Evaluate `query` over `rows` without touching any shared state.
    pub fn evaluate(rows: &[Value], query: &Query) -> Result<Vec<Value>, GatewayError> {
        let constraints = query
            .constraints
            .iter()
            .map(|c| Ok((ColumnPath::parse(c.column())?, c)))
            .collect::<Result<Vec<_>, GatewayError>>()?;

        let mut matched: Vec<&Value> = rows
            .iter()
            .filter(|row| constraints.iter().all(|(path, c)| matches(row, path, c)))
            .collect();

        if let Some(order) = &query.order {
            let path = ColumnPath::parse(&order.column)?;
            matched.sort_by(|a, b| {
                let ord = compare(path.lookup(a), path.lookup(b));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        if query.selects_all() {
            return Ok(matched.into_iter().cloned().collect());
        }

        let projection = query
            .columns
            .iter()
            .map(|c| ColumnPath::parse(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(matched
            .into_iter()
            .map(|row| {
                let mut out = Map::new();
                for path in &projection {
                    let value = path.lookup(row).cloned().unwrap_or(Value::Null);
                    out.insert(path.output_key().to_string(), value);
                }
                Value::Object(out)
            })
            .collect())
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn matches(row: &Value, path: &ColumnPath, constraint: &Constraint) -> bool {
    let value = path.lookup(row);
    match constraint {
        // `message->>text` on a scalar payload is NULL, as in SQL
        Constraint::ILike { pattern, .. } => value
            .and_then(text_of)
            .map(|t| ilike_matches(&t, pattern))
            .unwrap_or(false),
        Constraint::Eq { value: expected, .. } => match (value, expected) {
            (Some(actual), Value::Bool(_)) => actual == expected,
            (Some(actual), _) => text_of(actual) == text_of(expected),
            (None, _) => false,
        },
        Constraint::Gte { value: bound, .. } => value
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .map(|ts| ts >= *bound)
            .unwrap_or(false),
        Constraint::Lte { value: bound, .. } => value
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .map(|ts| ts <= *bound)
            .unwrap_or(false),
        Constraint::In { values, .. } => value
            .and_then(text_of)
            .map(|t| values.contains(&t))
            .unwrap_or(false),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(tx), Some(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DataGateway for MemoryGateway {
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        lock(&self.calls).push(query.clone());

        if let Some(message) = lock(&self.failure).clone() {
            return Err(GatewayError::Api { code: 503, message });
        }

        let tables = lock(&self.tables);
        let rows = tables.get(&query.table).map(Vec::as_slice).unwrap_or(&[]);
        Self::evaluate(rows, query)
    }

    async fn ping(&self) -> Result<String, GatewayError> {
        Ok(format!("memory ({} tables)", lock(&self.tables).len()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
