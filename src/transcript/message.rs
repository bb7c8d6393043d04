use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::store::{format_timestamp, parse_timestamp, StoredMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Candidate,
    Agent,
    System,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Candidate => "candidate",
            Speaker::Agent => "agent",
            Speaker::System => "system",
        }
    }

    /// Case-insensitive; also accepts the role names agents commonly emit
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "candidate" | "user" => Some(Speaker::Candidate),
            "agent" | "assistant" | "interviewer" | "ai" => Some(Speaker::Agent),
            "system" => Some(Speaker::System),
            _ => None,
        }
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub speaker: Speaker,
    pub text: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn serialize_timestamp<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(t))
}

/// Why a submitted message was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum MessageProblem {
    NotAnObject,
    MissingSpeaker,
    UnknownSpeaker(String),
    BadText,
    BadTimestamp(String),
}

impl std::fmt::Display for MessageProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageProblem::NotAnObject => f.write_str("message must be an object"),
            MessageProblem::MissingSpeaker => f.write_str("speaker is required"),
            MessageProblem::UnknownSpeaker(s) => write!(
                f,
                "unknown speaker \"{}\" (expected candidate, agent or system)",
                s
            ),
            MessageProblem::BadText => f.write_str("text must be a string"),
            MessageProblem::BadTimestamp(t) => write!(
                f,
                "unrecognised timestamp {} (expected ISO-8601 or epoch milliseconds)",
                t
            ),
        }
    }
}

impl Message {
    /// Strict parse of a submitted message. A missing timestamp means `now`,
    /// missing text means empty.
    pub fn from_submitted(value: &Value, now: DateTime<Utc>) -> Result<Self, MessageProblem> {
        let obj = value.as_object().ok_or(MessageProblem::NotAnObject)?;

        let speaker = match obj.get("speaker") {
            Some(Value::String(s)) => {
                Speaker::parse(s).ok_or_else(|| MessageProblem::UnknownSpeaker(s.clone()))?
            }
            Some(Value::Null) | None => return Err(MessageProblem::MissingSpeaker),
            Some(other) => return Err(MessageProblem::UnknownSpeaker(other.to_string())),
        };

        let text = match obj.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(_) => return Err(MessageProblem::BadText),
        };

        let timestamp = match obj.get("timestamp") {
            Some(Value::Null) | None => now,
            Some(raw) => normalize_timestamp(raw)
                .ok_or_else(|| MessageProblem::BadTimestamp(raw.to_string()))?,
        };

        Ok(Self {
            speaker,
            text,
            timestamp,
        })
    }

    /// Lenient parse for data already at rest: unknown speakers read as
    /// system, unparseable timestamps fall back to `fallback`.
    pub fn from_stored_value(value: &Value, fallback: DateTime<Utc>) -> Option<Self> {
        let obj = value.as_object()?;
        let speaker = obj
            .get("speaker")
            .and_then(Value::as_str)
            .and_then(Speaker::parse)
            .unwrap_or(Speaker::System);
        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = obj
            .get("timestamp")
            .and_then(normalize_timestamp)
            .unwrap_or(fallback);

        Some(Self {
            speaker,
            text,
            timestamp,
        })
    }

    pub fn from_row(row: StoredMessage, fallback: DateTime<Utc>) -> Self {
        Self {
            speaker: Speaker::parse(&row.speaker).unwrap_or(Speaker::System),
            text: row.text,
            timestamp: parse_timestamp(&row.timestamp).unwrap_or(fallback),
        }
    }

    pub fn to_row(&self) -> StoredMessage {
        StoredMessage {
            speaker: self.speaker.as_str().to_string(),
            text: self.text.clone(),
            timestamp: format_timestamp(&self.timestamp),
            timestamp_ms: Some(self.timestamp.timestamp_millis()),
        }
    }
}

/// Accepts RFC 3339, naive ISO-8601 (read as UTC) or epoch milliseconds
pub fn normalize_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_datetime(s),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}

pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(t) = parse_timestamp(raw) {
        return Some(t);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
