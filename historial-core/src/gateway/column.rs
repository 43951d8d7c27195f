use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::GatewayError;

/// Column reference in PostgREST notation: `session_id`, `message->>text`,
/// `meta->flags->>rx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPath {
    raw: String,
    column: String,
    keys: Vec<String>,
    /// Last hop used `->>` (value read back as text)
    as_text: bool,
}

fn column_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)((?:->>?[A-Za-z0-9_]+)*)$").expect("static regex")
    })
}

fn hop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(->>?)([A-Za-z0-9_]+)").expect("static regex"))
}

impl ColumnPath {
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let raw = raw.trim();
        let caps = column_path_regex()
            .captures(raw)
            .ok_or_else(|| GatewayError::InvalidColumn(raw.to_string()))?;

        let column = caps[1].to_string();
        let mut keys = Vec::new();
        let mut as_text = false;
        for hop in hop_regex().captures_iter(&caps[2]) {
            as_text = &hop[1] == "->>";
            keys.push(hop[2].to_string());
        }

        Ok(Self {
            raw: raw.to_string(),
            column,
            keys,
            as_text,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_json_path(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn reads_text(&self) -> bool {
        self.as_text
    }

    /// `message->>text`, the payload text field.
    pub fn is_payload_text(&self) -> bool {
        self.column == "message" && self.as_text && self.keys.len() == 1 && self.keys[0] == "text"
    }

    /// Key under which PostgREST returns a selected path: the last hop.
    pub fn output_key(&self) -> &str {
        self.keys.last().unwrap_or(&self.column)
    }

    /// Walk the JSON keys of this path starting at the column value.
    pub fn descend<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for key in &self.keys {
            current = current.as_object()?.get(key)?;
        }
        Some(current)
    }

    /// Column value within a whole JSON row.
    pub fn lookup<'a>(&self, row: &'a Value) -> Option<&'a Value> {
        let root = row.as_object()?.get(&self.column)?;
        self.descend(root)
    }

    /// SQL expression against table alias `alias`. Keys are restricted to
    /// `[A-Za-z0-9_]` by the parser, so they are safe to inline.
    pub fn to_sql(&self, alias: &str) -> String {
        let mut sql = format!("{}.{}", alias, quote_ident(&self.column));
        let last = self.keys.len().saturating_sub(1);
        for (i, key) in self.keys.iter().enumerate() {
            let op = if i == last && self.as_text { "->>" } else { "->" };
            sql.push_str(&format!("{}'{}'", op, key));
        }
        sql
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Double-quote a validated identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Check a bare identifier (table or schema name).
pub fn validate_ident(ident: &str) -> Result<&str, GatewayError> {
    let path = ColumnPath::parse(ident)?;
    if path.is_json_path() {
        return Err(GatewayError::InvalidColumn(ident.to_string()));
    }
    Ok(ident)
}
