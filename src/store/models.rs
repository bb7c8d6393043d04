use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Invitation lifecycle.
///
/// Forward path is `scheduled/sent/opened -> started -> completed`; any
/// non-terminal state may move sideways into `expired` or `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Scheduled,
    Sent,
    Opened,
    Started,
    Completed,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Scheduled => "scheduled",
            InvitationStatus::Sent => "sent",
            InvitationStatus::Opened => "opened",
            InvitationStatus::Started => "started",
            InvitationStatus::Completed => "completed",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(InvitationStatus::Scheduled),
            "sent" => Some(InvitationStatus::Sent),
            "opened" => Some(InvitationStatus::Opened),
            "started" => Some(InvitationStatus::Started),
            "completed" => Some(InvitationStatus::Completed),
            "expired" => Some(InvitationStatus::Expired),
            "cancelled" => Some(InvitationStatus::Cancelled),
            _ => None,
        }
    }

    /// States an invitation may be in immediately before entering `self`
    pub fn predecessors(&self) -> &'static [InvitationStatus] {
        use InvitationStatus::*;
        match self {
            Scheduled => &[],
            Sent => &[Scheduled],
            Opened => &[Scheduled, Sent],
            Started => &[Scheduled, Sent, Opened],
            Completed | Expired | Cancelled => &[Scheduled, Sent, Opened, Started],
        }
    }

    pub fn can_transition_to(&self, next: InvitationStatus) -> bool {
        next.predecessors().contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvitationStatus::Completed | InvitationStatus::Expired | InvitationStatus::Cancelled
        )
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Invitation {
    pub id: Uuid,
    pub company_id: String,
    pub job_id: Option<String>,
    pub candidate_email: String,
    pub candidate_name: Option<String>,
    pub status: InvitationStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub interview_completed_at: Option<DateTime<Utc>>,
    pub final_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a freshly issued invitation; it always starts `scheduled`
#[derive(Debug, Clone, Default)]
pub struct NewInvitation {
    pub company_id: String,
    pub job_id: Option<String>,
    pub candidate_email: String,
    pub candidate_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Started => "started",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(SessionStatus::Started),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// Invitation to room binding recorded at session start
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub invitation_id: Uuid,
    pub room_id: String,
    pub company_id: Option<String>,
    pub candidate_id: Option<String>,
    pub job_id: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub invitation_id: Uuid,
    pub room_id: String,
    pub company_id: Option<String>,
    pub candidate_id: Option<String>,
    pub job_id: Option<String>,
}

/// One message row as stored; speaker and timestamp are already normalized
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub speaker: String,
    pub text: String,
    pub timestamp: String,
    /// Sort key; rows written by older versions have none
    pub timestamp_ms: Option<i64>,
}

/// Transcript metadata row
#[derive(Debug, Clone)]
pub struct TranscriptRecord {
    pub id: i64,
    pub invitation_id: Uuid,
    pub room_id: String,
    pub company_id: Option<String>,
    pub job_id: Option<String>,
    pub candidate_email: Option<String>,
    pub candidate_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    /// Legacy embedded message array, raw JSON
    pub embedded_transcript: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full transcript snapshot to write; replaces all stored messages
#[derive(Debug, Clone)]
pub struct TranscriptSnapshot {
    pub invitation_id: Uuid,
    pub room_id: String,
    pub company_id: Option<String>,
    pub job_id: Option<String>,
    pub candidate_email: Option<String>,
    pub candidate_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRecord {
    pub id: i64,
    pub invitation_id: Uuid,
    pub room_id: Option<String>,
    pub company_id: String,
    pub job_id: String,
    pub candidate_email: Option<String>,
    pub candidate_name: Option<String>,
    pub questions_asked: i64,
    pub questions_answered: i64,
    pub correct_answers: i64,
    pub wrong_answers: i64,
    pub partial_answers: i64,
    pub total_score: f64,
    pub performance_metrics: serde_json::Value,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: String,
    pub transcript_summary: String,
    pub duration_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Report fields as written; defaults already applied
#[derive(Debug, Clone)]
pub struct ReportUpsert {
    pub invitation_id: Uuid,
    pub room_id: Option<String>,
    pub company_id: String,
    pub job_id: String,
    pub candidate_email: Option<String>,
    pub candidate_name: Option<String>,
    pub questions_asked: i64,
    pub questions_answered: i64,
    pub correct_answers: i64,
    pub wrong_answers: i64,
    pub partial_answers: i64,
    pub total_score: f64,
    pub performance_metrics: serde_json::Value,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: String,
    pub transcript_summary: String,
    pub duration_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Strict UUID check: canonical 36-character hyphenated form only
pub fn parse_uuid(raw: &str) -> Option<Uuid> {
    if raw.len() != 36 {
        return None;
    }
    Uuid::parse_str(raw).ok()
}

/// Stored timestamp format: RFC 3339, millisecond precision, `Z` suffix
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
