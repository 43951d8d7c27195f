use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single row-level predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Case-insensitive pattern match; `%` is the wildcard.
    ILike { column: String, pattern: String },
    Eq { column: String, value: Value },
    Gte { column: String, value: DateTime<Utc> },
    Lte { column: String, value: DateTime<Utc> },
    In { column: String, values: Vec<String> },
}

impl Constraint {
    pub fn column(&self) -> &str {
        match self {
            Constraint::ILike { column, .. }
            | Constraint::Eq { column, .. }
            | Constraint::Gte { column, .. }
            | Constraint::Lte { column, .. }
            | Constraint::In { column, .. } => column,
        }
    }

    /// `%needle%`
    pub fn contains(column: impl Into<String>, needle: &str) -> Self {
        Constraint::ILike {
            column: column.into(),
            pattern: format!("%{}%", needle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Chainable read query against one backend table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: Vec<String>,
    pub constraints: Vec<Constraint>,
    pub order: Option<Order>,
}

impl Query {
    pub fn select(table: impl Into<String>, columns: &[&str]) -> Self {
        let columns = if columns.is_empty() {
            vec!["*".to_string()]
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        };
        Self {
            table: table.into(),
            columns,
            constraints: Vec::new(),
            order: None,
        }
    }

    pub fn select_all(table: impl Into<String>) -> Self {
        Self::select(table, &["*"])
    }

    pub fn selects_all(&self) -> bool {
        self.columns.iter().any(|c| c == "*")
    }

    pub fn filter(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn filters(mut self, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    pub fn ilike(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(Constraint::ILike {
            column: column.into(),
            pattern: pattern.into(),
        })
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Constraint::Eq {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn gte(self, column: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.filter(Constraint::Gte {
            column: column.into(),
            value,
        })
    }

    pub fn lte(self, column: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.filter(Constraint::Lte {
            column: column.into(),
            value,
        })
    }

    pub fn in_list(self, column: impl Into<String>, values: &[String]) -> Self {
        self.filter(Constraint::In {
            column: column.into(),
            values: values.to_vec(),
        })
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }
}

/// Case-insensitive `LIKE` with `%` wildcards.
pub fn ilike_matches(value: &str, pattern: &str) -> bool {
    let value = value.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();

    if parts.len() == 1 {
        return value == pattern;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !value.starts_with(first) {
        return false;
    }
    let mut rest = &value[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
