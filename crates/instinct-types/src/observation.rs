use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Appended to any text field cut short by [`truncate_with_marker`]
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Kind of a captured event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolStart,
    ToolComplete,
    ParseError,
}

/// Hook phase the capture sink was invoked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    pub fn event_kind(self) -> EventKind {
        match self {
            Phase::Pre => EventKind::ToolStart,
            Phase::Post => EventKind::ToolComplete,
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre" => Ok(Phase::Pre),
            "post" => Ok(Phase::Post),
            other => Err(format!("unknown phase '{}', expected 'pre' or 'post'", other)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => write!(f, "pre"),
            Phase::Post => write!(f, "post"),
        }
    }
}

/// Tool-use notification as delivered by the host on stdin
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolUseNotification {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default, alias = "tool_output")]
    pub tool_response: Option<Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// One captured tool-use event, serialized as a single JSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(with = "utc_seconds")]
    pub timestamp: DateTime<Utc>,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Observation {
    /// Build the observation for a well-formed notification.
    ///
    /// `pre` carries the tool input, `post` carries the tool response. Both are
    /// cut to `max_chars` characters.
    pub fn from_notification(
        phase: Phase,
        notification: ToolUseNotification,
        max_chars: usize,
    ) -> Self {
        let (input, output) = match phase {
            Phase::Pre => (notification.tool_input.as_ref().map(value_text), None),
            Phase::Post => (None, notification.tool_response.as_ref().map(value_text)),
        };

        Self {
            timestamp: Utc::now(),
            event: phase.event_kind(),
            tool: notification.tool_name,
            session: notification
                .session_id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            input: input.map(|text| truncate_with_marker(&text, max_chars)),
            output: output.map(|text| truncate_with_marker(&text, max_chars)),
            raw: None,
        }
    }

    /// Build a `parse_error` record holding the (truncated) raw input
    pub fn parse_error(raw: &str, max_chars: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            event: EventKind::ParseError,
            tool: None,
            session: "unknown".to_string(),
            input: None,
            output: None,
            raw: Some(truncate_with_marker(raw, max_chars)),
        }
    }
}

/// Strings are stored verbatim, anything else as compact JSON
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cut `text` to at most `max_chars` characters, appending [`TRUNCATION_MARKER`]
/// when anything was dropped. Never splits a character.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

mod utc_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT)
            .map(|naive| naive.and_utc())
            .or_else(|_| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}
