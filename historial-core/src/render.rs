//! Display helpers for chat payloads.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// A flattened "Humano: ... IA: ..." turn split into its two speakers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub human: String,
    pub ai: String,
}

fn ai_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"IA:|IA\n").expect("static regex"))
}

fn human_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(Humano|Usuario):\s*").expect("static regex"))
}

/// Split a transcript when it names the human speaker and contains an `IA:` marker.
pub fn split_transcript(text: &str) -> Option<Transcript> {
    let lower = text.to_lowercase();
    if !lower.contains("humano:") && !lower.contains("usuario:") {
        return None;
    }
    let parts: Vec<&str> = ai_marker().split(text).collect();
    if parts.len() < 2 {
        return None;
    }
    Some(Transcript {
        human: human_prefix().replace(parts[0], "").trim().to_string(),
        ai: parts[1..].join("IA:").trim().to_string(),
    })
}

/// `...` plus the last six characters of the id.
pub fn short_session_id(session_id: &str) -> String {
    let tail: String = session_id
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{}", tail)
}
