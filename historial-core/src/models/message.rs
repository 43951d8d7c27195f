use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::gateway::ColumnPath;

/// Chat payload as stored in the `message` column.
///
/// Rows written by the n8n chat memory node carry `{"type": ..., "text": ...}`
/// objects; older rows and hand-made tables store a bare string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum MessagePayload {
    /// Object with a `text` member
    Structured(Map<String, Value>),
    /// Anything else: string, number, null, object without `text`
    Opaque(Value),
}

impl Default for MessagePayload {
    fn default() -> Self {
        MessagePayload::Opaque(Value::Null)
    }
}

impl From<Value> for MessagePayload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) if map.contains_key("text") => MessagePayload::Structured(map),
            other => MessagePayload::Opaque(other),
        }
    }
}

impl From<MessagePayload> for Value {
    fn from(payload: MessagePayload) -> Self {
        match payload {
            MessagePayload::Structured(map) => Value::Object(map),
            MessagePayload::Opaque(v) => v,
        }
    }
}

impl MessagePayload {
    pub fn text(&self) -> String {
        match self {
            MessagePayload::Structured(map) => map.get("text").map(scalar_text).unwrap_or_default(),
            MessagePayload::Opaque(v) => scalar_text(v),
        }
    }

    pub fn as_value(&self) -> Value {
        self.clone().into()
    }
}

/// Normalised text of any payload shape. The single accessor used by
/// rendering, export and classification.
pub fn extract_text(payload: &Value) -> String {
    match payload {
        Value::Object(map) if map.contains_key("text") => {
            map.get("text").map(scalar_text).unwrap_or_default()
        }
        other => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One chat turn as returned by the backend.
///
/// `created_at` is parsed for ordering and date maths; the backend's own
/// rendering is kept in `created_at_raw` and is what gets serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRow")]
pub struct Message {
    pub id: Value,
    pub session_id: String,
    pub message: MessagePayload,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "created_at")]
    pub created_at_raw: String,
    /// Table-specific columns, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct MessageRow {
    #[serde(default)]
    id: Value,
    session_id: String,
    #[serde(default)]
    message: MessagePayload,
    created_at: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<MessageRow> for Message {
    type Error = String;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let created_at =
            parse_timestamp(&row.created_at).ok_or_else(|| format!("invalid timestamp: {}", row.created_at))?;
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            message: row.message,
            created_at,
            created_at_raw: row.created_at,
            extra: row.extra,
        })
    }
}

impl Message {
    pub fn text(&self) -> String {
        self.message.text()
    }

    /// Top-level column by name.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.clone()),
            "session_id" => Some(Value::String(self.session_id.clone())),
            "message" => Some(self.message.as_value()),
            "created_at" => Some(Value::String(self.created_at_raw.clone())),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Value at a column path such as `message->>text`.
    pub fn value_at(&self, path: &ColumnPath) -> Option<Value> {
        let root = self.field(path.column())?;
        path.descend(&root).cloned()
    }

    /// Text at a column path. The payload text path goes through
    /// `extract_text` so scalar payloads are matched too.
    pub fn text_at(&self, path: &ColumnPath) -> Option<String> {
        if path.is_payload_text() {
            return Some(self.text());
        }
        self.value_at(path).and_then(|v| match v {
            Value::Null => None,
            other => Some(scalar_text(&other)),
        })
    }
}

/// Projection used by the candidate query.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateRow {
    pub session_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Projection used by the special-filter query.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionIdRow {
    pub session_id: String,
}

/// Accepts RFC 3339 and Postgres `timestamp without time zone` renderings
/// (treated as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"]
        .iter()
        .find_map(|fmt| {
            DateTime::parse_from_str(raw, fmt)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(raw, fmt).ok().map(|n| n.and_utc()))
        })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(message: Value) -> Message {
        serde_json::from_value(json!({
            "id": 7,
            "session_id": "s-1",
            "message": message,
            "created_at": "2024-01-10T08:30:00.123456+00:00",
            "correo_enviado": true
        }))
        .unwrap()
    }

    #[test]
    fn test_structured_payload_text() {
        let msg = row(json!({"type": "human", "text": "Necesito una Radiografía"}));
        assert!(matches!(msg.message, MessagePayload::Structured(_)));
        assert_eq!(msg.text(), "Necesito una Radiografía");
    }

    #[test]
    fn test_scalar_payloads_are_stringified() {
        assert_eq!(row(json!("hola")).text(), "hola");
        assert_eq!(row(json!(42)).text(), "42");
        assert_eq!(row(Value::Null).text(), "");
        assert_eq!(row(json!({"content": "x"})).text(), r#"{"content":"x"}"#);
        assert_eq!(extract_text(&json!({"text": 3})), "3");
    }

    #[test]
    fn test_payload_shape_survives_serialization() {
        let msg = row(json!({"type": "ai", "text": "ok"}));
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["message"], json!({"type": "ai", "text": "ok"}));
        assert_eq!(back["correo_enviado"], json!(true));
    }

    #[test]
    fn test_extra_columns_and_paths() {
        let msg = row(json!({"text": "Radiografía panorámica"}));
        let flag = ColumnPath::parse("correo_enviado").unwrap();
        assert_eq!(msg.value_at(&flag), Some(json!(true)));

        let text = ColumnPath::parse("message->>text").unwrap();
        assert_eq!(msg.text_at(&text).as_deref(), Some("Radiografía panorámica"));

        let missing = ColumnPath::parse("nope").unwrap();
        assert_eq!(msg.value_at(&missing), None);
    }

    #[test]
    fn test_timestamp_formats() {
        let a = parse_timestamp("2024-01-10T00:00:00Z").unwrap();
        let b = parse_timestamp("2024-01-10 00:00:00").unwrap();
        let c = parse_timestamp("2024-01-10T02:00:00+02:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_backend_timestamp_text_is_kept() {
        let msg = row(json!("hola"));
        assert_eq!(msg.created_at_raw, "2024-01-10T08:30:00.123456+00:00");
        assert_eq!(msg.created_at.timestamp_subsec_micros(), 123456);

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["created_at"], "2024-01-10T08:30:00.123456+00:00");
        assert!(back.get("created_at_raw").is_none());

        let bad: Result<Message, _> = serde_json::from_value(json!({
            "session_id": "s", "created_at": "ayer"
        }));
        assert!(bad.unwrap_err().to_string().contains("invalid timestamp"));
    }
}
