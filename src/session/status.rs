use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::{AgentService, AgentStatus};
use crate::livekit::{
    ParticipantInfo, RoomService, RoomServiceError, RoomStatus, AGENT_IDENTITY_PREFIX,
    CANDIDATE_IDENTITY_PREFIX,
};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("room or candidateId parameter is required")]
    MissingTarget,
}

/// Query parameters of the status endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub room: Option<String>,
    pub candidate_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Success,
    RoomNotFound,
    Error,
}

/// Which signal produced a successful answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    AgentService,
    RoomService,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub identity: String,
    pub name: String,
    pub is_agent: bool,
    pub is_candidate: bool,
    pub joined_at: Option<String>,
}

impl From<&ParticipantInfo> for ParticipantView {
    fn from(p: &ParticipantInfo) -> Self {
        Self {
            identity: p.identity.clone(),
            name: p.name.clone(),
            is_agent: p.identity.starts_with(AGENT_IDENTITY_PREFIX),
            is_candidate: p.identity.starts_with(CANDIDATE_IDENTITY_PREFIX),
            joined_at: p.joined_at_iso(),
        }
    }
}

/// Merged session status. `room_not_found` and `error` are ordinary answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<StatusSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    pub agent_connected: bool,
    pub candidate_connected: bool,
    pub participant_count: usize,
    pub participants: Vec<ParticipantView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_listening: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_agent_speaking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    fn empty(status: StatusKind, room_name: &str) -> Self {
        Self {
            status,
            source: None,
            room_name: Some(room_name.to_string()),
            agent_connected: false,
            candidate_connected: false,
            participant_count: 0,
            participants: Vec::new(),
            current_question: None,
            interview_progress: None,
            ai_analysis: None,
            is_listening: None,
            is_agent_speaking: None,
            room_metadata: None,
            error: None,
        }
    }

    pub fn room_not_found(room_name: &str) -> Self {
        Self::empty(StatusKind::RoomNotFound, room_name)
    }

    pub fn error(room_name: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::empty(StatusKind::Error, room_name)
        }
    }

    /// Agent-service answer taken as-is, with a synthesized participant list
    fn from_agent(room_name: &str, candidate_id: &str, status: AgentStatus) -> Self {
        let now = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        let mut participants = vec![ParticipantView {
            identity: format!("{}-{}", CANDIDATE_IDENTITY_PREFIX, candidate_id),
            name: "Candidate".to_string(),
            is_agent: false,
            is_candidate: true,
            joined_at: now.clone(),
        }];
        if status.agent_connected {
            participants.push(ParticipantView {
                identity: AGENT_IDENTITY_PREFIX.to_string(),
                name: "AI Interviewer".to_string(),
                is_agent: true,
                is_candidate: false,
                joined_at: now,
            });
        }

        Self {
            status: StatusKind::Success,
            source: Some(StatusSource::AgentService),
            room_name: Some(room_name.to_string()),
            agent_connected: status.agent_connected,
            candidate_connected: true,
            participant_count: participants.len(),
            participants,
            current_question: status.current_question,
            interview_progress: Some(status.interview_progress),
            ai_analysis: status.ai_analysis,
            is_listening: Some(status.is_listening),
            is_agent_speaking: Some(status.is_agent_speaking),
            room_metadata: None,
            error: None,
        }
    }
}

/// Room metadata written by room provisioning (or an out-of-band agent)
fn parse_metadata(raw: &str) -> Result<Option<Value>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw).map(Some)
}

fn metadata_says_agent_connected(metadata: Option<&Value>) -> bool {
    let Some(status) = metadata.and_then(|m| m.get("status")) else {
        return false;
    };
    serde_json::from_value::<RoomStatus>(status.clone())
        .map(|s| s == RoomStatus::AgentConnected)
        .unwrap_or(false)
}

/// Why the room-service lookup could not produce an answer
#[derive(Debug, Error)]
enum RoomLookupError {
    #[error(transparent)]
    Room(#[from] RoomServiceError),

    #[error("room metadata is not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("room service did not answer within {0:?}")]
    TimedOut(Duration),
}

/// Answers "who is in the interview" from three sources, highest first:
/// the agent service, the room's participant list, then the room metadata
/// flag. The first source that answers wins; flags are never merged across
/// sources except the metadata override of an absent agent participant.
///
/// Read-only; safe to call with unbounded concurrency.
pub struct StatusReconciler {
    agents: Arc<dyn AgentService>,
    rooms: Arc<dyn RoomService>,
    agent_timeout: Duration,
    room_timeout: Duration,
}

impl StatusReconciler {
    pub fn new(
        agents: Arc<dyn AgentService>,
        rooms: Arc<dyn RoomService>,
        agent_timeout: Duration,
        room_timeout: Duration,
    ) -> Self {
        Self {
            agents,
            rooms,
            agent_timeout,
            room_timeout,
        }
    }

    pub async fn status(&self, query: &StatusQuery) -> Result<StatusReport, StatusError> {
        let room = query.room.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let candidate = query
            .candidate_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let room_name = match (room, candidate) {
            (Some(room), _) => room.to_string(),
            (None, Some(candidate)) => format!("interview-{}", candidate),
            (None, None) => return Err(StatusError::MissingTarget),
        };

        if let Some(candidate) = candidate {
            if let Some(report) = self.from_agent_service(&room_name, candidate).await {
                return Ok(report);
            }
        }

        let lookup = tokio::time::timeout(self.room_timeout, self.from_room_service(&room_name))
            .await
            .unwrap_or_else(|_| Err(RoomLookupError::TimedOut(self.room_timeout)));

        Ok(match lookup {
            Ok(Some(report)) => report,
            Ok(None) => StatusReport::room_not_found(&room_name),
            Err(e) => {
                warn!("Room status lookup for {} failed: {}", room_name, e);
                StatusReport::error(&room_name, e.to_string())
            }
        })
    }

    async fn from_agent_service(&self, room_name: &str, candidate_id: &str) -> Option<StatusReport> {
        match tokio::time::timeout(self.agent_timeout, self.agents.interview_status(candidate_id))
            .await
        {
            Ok(Ok(status)) => Some(StatusReport::from_agent(room_name, candidate_id, status)),
            Ok(Err(e)) => {
                debug!(
                    "Agent status for {} unavailable, falling back to room service: {:#}",
                    candidate_id, e
                );
                None
            }
            Err(_) => {
                debug!(
                    "Agent status for {} timed out, falling back to room service",
                    candidate_id
                );
                None
            }
        }
    }

    /// `Ok(None)` when the room does not exist
    async fn from_room_service(
        &self,
        room_name: &str,
    ) -> Result<Option<StatusReport>, RoomLookupError> {
        let rooms = self.rooms.list_rooms(&[room_name.to_string()]).await?;
        let Some(room) = rooms.into_iter().find(|r| r.name == room_name) else {
            return Ok(None);
        };

        let participants = self.rooms.list_participants(room_name).await?;
        let metadata = parse_metadata(&room.metadata)?;

        let views: Vec<ParticipantView> = participants.iter().map(ParticipantView::from).collect();
        let agent_connected =
            views.iter().any(|p| p.is_agent) || metadata_says_agent_connected(metadata.as_ref());
        let candidate_connected = views.iter().any(|p| p.is_candidate);

        Ok(Some(StatusReport {
            status: StatusKind::Success,
            source: Some(StatusSource::RoomService),
            room_name: Some(room_name.to_string()),
            agent_connected,
            candidate_connected,
            participant_count: views.len(),
            participants: views,
            current_question: None,
            interview_progress: None,
            ai_analysis: None,
            is_listening: None,
            is_agent_speaking: None,
            room_metadata: metadata,
            error: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStartRequest;
    use crate::livekit::{CreateRoomRequest, RoomInfo};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    struct Agents(Option<AgentStatus>);

    #[async_trait]
    impl AgentService for Agents {
        async fn start_interview(&self, _request: &AgentStartRequest) -> Result<Value> {
            Err(anyhow!("unused"))
        }

        async fn interview_status(&self, _candidate_id: &str) -> Result<AgentStatus> {
            self.0.clone().ok_or_else(|| anyhow!("connection refused"))
        }
    }

    #[derive(Default)]
    struct Rooms {
        room: Option<RoomInfo>,
        participants: Vec<ParticipantInfo>,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl RoomService for Rooms {
        async fn create_room(&self, _request: &CreateRoomRequest) -> Result<RoomInfo, RoomServiceError> {
            Err(RoomServiceError::Transport("unused".to_string()))
        }

        async fn list_rooms(&self, names: &[String]) -> Result<Vec<RoomInfo>, RoomServiceError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(RoomServiceError::Http {
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
            Ok(self
                .room
                .iter()
                .filter(|r| names.contains(&r.name))
                .cloned()
                .collect())
        }

        async fn list_participants(&self, _room: &str) -> Result<Vec<ParticipantInfo>, RoomServiceError> {
            Ok(self.participants.clone())
        }
    }

    fn room(name: &str, metadata: &str) -> RoomInfo {
        RoomInfo {
            name: name.to_string(),
            metadata: metadata.to_string(),
            ..Default::default()
        }
    }

    fn participant(identity: &str, joined_at: i64) -> ParticipantInfo {
        ParticipantInfo {
            identity: identity.to_string(),
            name: identity.to_string(),
            joined_at,
            ..Default::default()
        }
    }

    fn reconciler(agent: Option<AgentStatus>, rooms: Rooms) -> StatusReconciler {
        StatusReconciler::new(
            Arc::new(Agents(agent)),
            Arc::new(rooms),
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
    }

    fn by_room(room: &str) -> StatusQuery {
        StatusQuery {
            room: Some(room.to_string()),
            candidate_id: None,
        }
    }

    #[tokio::test]
    async fn test_missing_room_is_not_an_error() {
        let report = reconciler(None, Rooms::default())
            .status(&by_room("gone"))
            .await
            .unwrap();
        assert_eq!(report.status, StatusKind::RoomNotFound);
        assert!(!report.agent_connected);
        assert!(report.participants.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_flag_overrides_missing_agent_participant() {
        let rooms = Rooms {
            room: Some(room("r1", r#"{"status":"agent_connected"}"#)),
            participants: vec![participant("candidate-c1", 1_700_000_000_000)],
            ..Default::default()
        };
        let report = reconciler(None, rooms).status(&by_room("r1")).await.unwrap();

        assert_eq!(report.status, StatusKind::Success);
        assert_eq!(report.source, Some(StatusSource::RoomService));
        assert!(report.agent_connected);
        assert!(report.candidate_connected);
        assert_eq!(
            report.participants[0].joined_at.as_deref(),
            Some("2023-11-14T22:13:20.000Z")
        );
    }

    #[tokio::test]
    async fn test_agent_participant_prefix() {
        let rooms = Rooms {
            room: Some(room("r1", r#"{"status":"waiting_for_agent"}"#)),
            participants: vec![participant("interview-agent-17-0", 0)],
            ..Default::default()
        };
        let report = reconciler(None, rooms).status(&by_room("r1")).await.unwrap();
        assert!(report.agent_connected);
        assert!(!report.candidate_connected);
        assert_eq!(report.participants[0].joined_at, None);
    }

    #[tokio::test]
    async fn test_agent_service_takes_precedence() {
        let agent = AgentStatus {
            agent_connected: false,
            interview_progress: 40.0,
            ..Default::default()
        };
        // Room metadata disagrees; the agent service answer is used as-is
        let rooms = Rooms {
            room: Some(room("interview-c1", r#"{"status":"agent_connected"}"#)),
            ..Default::default()
        };
        let query = StatusQuery {
            room: None,
            candidate_id: Some("c1".to_string()),
        };
        let report = reconciler(Some(agent), rooms).status(&query).await.unwrap();

        assert_eq!(report.source, Some(StatusSource::AgentService));
        assert_eq!(report.room_name.as_deref(), Some("interview-c1"));
        assert!(!report.agent_connected);
        assert_eq!(report.interview_progress, Some(40.0));
        assert_eq!(report.participant_count, 1);
        assert_eq!(report.participants[0].identity, "candidate-c1");
    }

    #[tokio::test]
    async fn test_falls_back_when_agent_service_fails() {
        let rooms = Rooms {
            room: Some(room("interview-c1", "")),
            participants: vec![participant("candidate-c1", 0)],
            ..Default::default()
        };
        let query = StatusQuery {
            room: None,
            candidate_id: Some("c1".to_string()),
        };
        let report = reconciler(None, rooms).status(&query).await.unwrap();
        assert_eq!(report.source, Some(StatusSource::RoomService));
        assert!(report.room_metadata.is_none());
        assert!(report.candidate_connected);
    }

    #[tokio::test]
    async fn test_malformed_metadata_reports_error() {
        let rooms = Rooms {
            room: Some(room("r1", "{not json")),
            ..Default::default()
        };
        let report = reconciler(None, rooms).status(&by_room("r1")).await.unwrap();
        assert_eq!(report.status, StatusKind::Error);
        assert!(report.error.unwrap().contains("metadata"));
        assert!(!report.agent_connected);
    }

    #[tokio::test]
    async fn test_room_service_failure_reports_error() {
        let rooms = Rooms {
            fail: true,
            ..Default::default()
        };
        let report = reconciler(None, rooms).status(&by_room("r1")).await.unwrap();
        assert_eq!(report.status, StatusKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_room_service_reports_error() {
        let rooms = Rooms {
            hang: true,
            ..Default::default()
        };
        let started = tokio::time::Instant::now();
        let report = reconciler(None, rooms).status(&by_room("r1")).await.unwrap();

        assert_eq!(report.status, StatusKind::Error);
        assert!(report.error.unwrap().contains("did not answer"));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_requires_room_or_candidate() {
        let err = reconciler(None, Rooms::default())
            .status(&StatusQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::MissingTarget));
    }
}
