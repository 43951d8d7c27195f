use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AnalyticsConfig, Message};

/// Messages sharing a session id. Derived, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub messages: Vec<Message>,
    /// Max member timestamp
    pub last_activity: Option<DateTime<Utc>>,
    /// Analytics classifier over the members
    pub positive: bool,
}

impl Session {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>, classifier: &AnalyticsConfig) -> Self {
        let mut session = Self {
            session_id: session_id.into(),
            messages,
            last_activity: None,
            positive: false,
        };
        session.recompute(classifier);
        session
    }

    pub fn push(&mut self, message: Message, classifier: &AnalyticsConfig) {
        self.messages.push(message);
        self.recompute(classifier);
    }

    fn recompute(&mut self, classifier: &AnalyticsConfig) {
        self.last_activity = self.messages.iter().map(|m| m.created_at).max();
        self.positive = classifier.is_positive(&self.messages);
    }

    pub fn first_activity(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.created_at).min()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Group rows by session id, keeping each group in input order.
pub fn group_by_session(rows: impl IntoIterator<Item = Message>) -> HashMap<String, Vec<Message>> {
    let mut groups: HashMap<String, Vec<Message>> = HashMap::new();
    for msg in rows {
        groups.entry(msg.session_id.clone()).or_default().push(msg);
    }
    groups
}
