use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::KeyedLocks;
use super::message::{parse_datetime, Message, MessageProblem};
use crate::store::{
    parse_uuid, Database, MessageColumn, StoreError, TranscriptRecord, TranscriptSnapshot,
};

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("transcript must be an array of messages")]
    NotAnArray,

    #[error("transcript must contain at least one message")]
    Empty,

    #[error("Invalid {field} format. Expected a UUID like \"550e8400-e29b-41d4-a716-446655440000\", got \"{value}\"")]
    InvalidUuid { field: &'static str, value: String },

    #[error("transcript[{index}]: {problem}")]
    InvalidMessage { index: usize, problem: MessageProblem },

    #[error("Invalid {field}: \"{value}\" is not an ISO-8601 timestamp")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Either invitation_id or room_id is required")]
    MissingLookup,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TranscriptError {
    /// Request field at fault, for validation failures
    pub fn field(&self) -> Option<&'static str> {
        match self {
            TranscriptError::MissingFields(fields) => fields.first().copied(),
            TranscriptError::NotAnArray
            | TranscriptError::Empty
            | TranscriptError::InvalidMessage { .. } => Some("transcript"),
            TranscriptError::InvalidUuid { field, .. }
            | TranscriptError::InvalidTimestamp { field, .. } => Some(field),
            TranscriptError::MissingLookup | TranscriptError::Store(_) => None,
        }
    }
}

/// Transcript save payload. `interview_id` is accepted as an alias of
/// `invitation_id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveTranscriptRequest {
    pub invitation_id: Option<String>,
    pub interview_id: Option<String>,
    pub room_id: Option<String>,
    pub company_id: Option<String>,
    pub job_id: Option<String>,
    pub transcript: Option<Value>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub candidate_email: Option<String>,
    pub candidate_name: Option<String>,
}

#[derive(Debug)]
struct ValidatedSave {
    invitation_id: Uuid,
    room_id: Option<String>,
    company_id: Option<String>,
    job_id: Option<String>,
    candidate_email: Option<String>,
    candidate_name: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    messages: Vec<Message>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_optional_time(
    field: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, TranscriptError> {
    match non_blank(raw) {
        Some(raw) => parse_datetime(&raw)
            .map(Some)
            .ok_or(TranscriptError::InvalidTimestamp { field, value: raw }),
        None => Ok(None),
    }
}

impl SaveTranscriptRequest {
    /// Checks run in a fixed order: presence, shape, emptiness, id format,
    /// then each message.
    fn validate(self, now: DateTime<Utc>) -> Result<ValidatedSave, TranscriptError> {
        let raw_id = non_blank(self.invitation_id).or_else(|| non_blank(self.interview_id));
        let transcript = self.transcript.filter(|t| !t.is_null());

        let mut missing = Vec::new();
        if raw_id.is_none() {
            missing.push("invitation_id");
        }
        if transcript.is_none() {
            missing.push("transcript");
        }
        let (Some(raw_id), Some(transcript)) = (raw_id, transcript) else {
            return Err(TranscriptError::MissingFields(missing));
        };

        let Value::Array(items) = transcript else {
            return Err(TranscriptError::NotAnArray);
        };
        if items.is_empty() {
            return Err(TranscriptError::Empty);
        }

        let invitation_id =
            parse_uuid(raw_id.trim()).ok_or_else(|| TranscriptError::InvalidUuid {
                field: "invitation_id",
                value: raw_id.clone(),
            })?;

        let messages = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                Message::from_submitted(item, now)
                    .map_err(|problem| TranscriptError::InvalidMessage { index, problem })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedSave {
            invitation_id,
            room_id: non_blank(self.room_id),
            company_id: non_blank(self.company_id),
            job_id: non_blank(self.job_id),
            candidate_email: non_blank(self.candidate_email),
            candidate_name: non_blank(self.candidate_name),
            started_at: parse_optional_time("started_at", self.started_at)?,
            ended_at: parse_optional_time("ended_at", self.ended_at)?,
            messages,
        })
    }
}

/// Outcome of a successful save
#[derive(Debug, Clone, Serialize)]
pub struct SavedTranscript {
    pub transcript_id: i64,
    pub invitation_id: Uuid,
    /// Room id as stored, after canonicalisation
    pub room_id: String,
    pub message_count: usize,
    /// Whether this save moved the invitation to `completed`
    pub invitation_completed: bool,
}

/// How to find a stored transcript
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptLookup {
    Invitation(Uuid),
    Room(String),
}

impl TranscriptLookup {
    /// Invitation id wins when both are given
    pub fn from_query(
        invitation_id: Option<&str>,
        room_id: Option<&str>,
    ) -> Result<Self, TranscriptError> {
        let invitation_id = invitation_id.map(str::trim).filter(|s| !s.is_empty());
        let room_id = room_id.map(str::trim).filter(|s| !s.is_empty());

        match (invitation_id, room_id) {
            (Some(raw), _) => parse_uuid(raw).map(TranscriptLookup::Invitation).ok_or_else(|| {
                TranscriptError::InvalidUuid {
                    field: "invitation_id",
                    value: raw.to_string(),
                }
            }),
            (None, Some(room)) => Ok(TranscriptLookup::Room(room.to_string())),
            (None, None) => Err(TranscriptError::MissingLookup),
        }
    }
}

/// Where a transcript's messages were found.
///
/// Strategies are tried in [`MessageReadStrategy::READ_ORDER`]; the first
/// one that yields messages wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageReadStrategy {
    /// Message rows keyed by `transcript_id`
    ChildRows,
    /// Message rows keyed by the pre-rename `interview_transcript_id`
    LegacyChildRows,
    /// JSON array embedded on the transcript row itself
    EmbeddedArray,
}

impl MessageReadStrategy {
    pub const READ_ORDER: [MessageReadStrategy; 3] = [
        MessageReadStrategy::ChildRows,
        MessageReadStrategy::LegacyChildRows,
        MessageReadStrategy::EmbeddedArray,
    ];

    async fn read(
        &self,
        db: &Database,
        record: &TranscriptRecord,
    ) -> Result<Vec<Message>, StoreError> {
        let fallback = record.created_at;
        match self {
            MessageReadStrategy::ChildRows => Ok(db
                .transcript_messages(record.id, MessageColumn::Current)
                .await?
                .into_iter()
                .map(|row| Message::from_row(row, fallback))
                .collect()),
            MessageReadStrategy::LegacyChildRows => Ok(db
                .transcript_messages(record.id, MessageColumn::Legacy)
                .await?
                .into_iter()
                .map(|row| Message::from_row(row, fallback))
                .collect()),
            MessageReadStrategy::EmbeddedArray => {
                Ok(embedded_messages(record.embedded_transcript.as_deref(), fallback))
            }
        }
    }
}

fn embedded_messages(raw: Option<&str>, fallback: DateTime<Utc>) -> Vec<Message> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => {
            let mut messages: Vec<Message> = items
                .iter()
                .filter_map(|item| Message::from_stored_value(item, fallback))
                .collect();
            messages.sort_by_key(|m| m.timestamp);
            messages
        }
        Ok(_) => {
            warn!("Embedded transcript is not an array, ignoring");
            Vec::new()
        }
        Err(e) => {
            warn!("Embedded transcript is not valid JSON: {}", e);
            Vec::new()
        }
    }
}

/// Transcript as returned to readers
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptView {
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
    pub message_count: usize,
    pub message_source: Option<MessageReadStrategy>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn duration_between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => Some((end - start).num_seconds()),
        _ => None,
    }
}

/// Idempotent transcript persistence.
///
/// Every save is a full snapshot of the conversation so far: the stored
/// messages are replaced, never appended to. Saves for the same invitation
/// are serialised.
pub struct TranscriptPersister {
    db: Database,
    locks: KeyedLocks<Uuid>,
}

impl TranscriptPersister {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn save(&self, request: SaveTranscriptRequest) -> Result<SavedTranscript, TranscriptError> {
        let now = Utc::now();
        let input = request.validate(now)?;
        let invitation_id = input.invitation_id;

        let _guard = self.locks.lock(invitation_id).await;

        info!(
            "Saving transcript for invitation {} ({} messages)",
            invitation_id,
            input.messages.len()
        );

        let room_id = self
            .canonical_room_id(invitation_id, input.room_id.as_deref())
            .await;

        let company_id = match input.company_id {
            Some(company) => Some(company),
            None => self.invitation_company(invitation_id).await,
        };

        let snapshot = TranscriptSnapshot {
            invitation_id,
            room_id: room_id.clone(),
            company_id,
            job_id: input.job_id,
            candidate_email: input.candidate_email,
            candidate_name: input.candidate_name,
            started_at: input.started_at,
            ended_at: input.ended_at,
            duration_seconds: duration_between(input.started_at, input.ended_at),
            messages: input.messages.iter().map(Message::to_row).collect(),
        };

        let record = self.db.save_transcript_snapshot(snapshot).await?;
        info!(
            "Transcript {} saved for invitation {}",
            record.id, invitation_id
        );

        let invitation_completed = self.complete_invitation(invitation_id, now).await;

        Ok(SavedTranscript {
            transcript_id: record.id,
            invitation_id,
            room_id,
            message_count: input.messages.len(),
            invitation_completed,
        })
    }

    /// Prefer the room recorded at session start over the caller's; a room
    /// id that is not a UUID is replaced by the invitation id.
    async fn canonical_room_id(&self, invitation_id: Uuid, supplied: Option<&str>) -> String {
        let recorded = match self.db.room_for_invitation(invitation_id).await {
            Ok(room) => room,
            Err(e) => {
                warn!(
                    "Could not read session room for invitation {}, using supplied room: {}",
                    invitation_id, e
                );
                None
            }
        };

        if let (Some(recorded), Some(supplied)) = (recorded.as_deref(), supplied) {
            if recorded != supplied {
                debug!(
                    "Using recorded room {} instead of supplied {}",
                    recorded, supplied
                );
            }
        }

        let candidate = recorded.or_else(|| supplied.map(str::to_string));
        match candidate.as_deref().and_then(parse_uuid) {
            Some(room_uuid) => room_uuid.to_string(),
            None => {
                warn!(
                    "Room id {:?} is not a UUID, storing invitation id {} as room id",
                    candidate, invitation_id
                );
                invitation_id.to_string()
            }
        }
    }

    async fn invitation_company(&self, invitation_id: Uuid) -> Option<String> {
        match self.db.get_invitation(invitation_id).await {
            Ok(invitation) => invitation.map(|i| i.company_id),
            Err(e) => {
                warn!("Could not read invitation {}: {}", invitation_id, e);
                None
            }
        }
    }

    /// Best-effort; the transcript is already durable
    async fn complete_invitation(&self, invitation_id: Uuid, at: DateTime<Utc>) -> bool {
        match self.db.complete_invitation(invitation_id, at).await {
            Ok(true) => {
                info!("Invitation {} marked completed", invitation_id);
                true
            }
            Ok(false) => {
                debug!(
                    "Invitation {} not moved to completed (missing or already final)",
                    invitation_id
                );
                false
            }
            Err(e) => {
                warn!(
                    "Failed to mark invitation {} completed, transcript kept: {}",
                    invitation_id, e
                );
                false
            }
        }
    }

    pub async fn find(&self, lookup: &TranscriptLookup) -> Result<Option<TranscriptView>, TranscriptError> {
        let record = match lookup {
            TranscriptLookup::Invitation(id) => self.db.transcript_by_invitation(*id).await?,
            TranscriptLookup::Room(room) => match self.db.transcript_by_room(room).await? {
                Some(record) => Some(record),
                // Slug room ids are stored as the invitation id
                None => match self.db.invitation_for_room(room).await? {
                    Some(invitation_id) => self.db.transcript_by_invitation(invitation_id).await?,
                    None => None,
                },
            },
        };

        let Some(record) = record else {
            return Ok(None);
        };

        let mut messages = Vec::new();
        let mut message_source = None;
        for strategy in MessageReadStrategy::READ_ORDER {
            let found = strategy.read(&self.db, &record).await?;
            if !found.is_empty() {
                messages = found;
                message_source = Some(strategy);
                break;
            }
        }

        if let Some(strategy) = message_source.filter(|s| *s != MessageReadStrategy::ChildRows) {
            debug!(
                "Transcript {} read through fallback {:?}",
                record.id, strategy
            );
        }

        Ok(Some(TranscriptView {
            id: record.id,
            invitation_id: record.invitation_id,
            duration_seconds: record
                .duration_seconds
                .or_else(|| duration_between(record.started_at, record.ended_at)),
            room_id: record.room_id,
            company_id: record.company_id,
            job_id: record.job_id,
            candidate_email: record.candidate_email,
            candidate_name: record.candidate_name,
            started_at: record.started_at,
            ended_at: record.ended_at,
            message_count: messages.len(),
            message_source,
            messages,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }
}
