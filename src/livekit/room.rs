use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::token::TokenIssuer;
use crate::config::LiveKitConfig;

#[derive(Debug, thiserror::Error)]
pub enum RoomServiceError {
    /// The room is already present; session start treats this as success
    #[error("room already exists")]
    AlreadyExists,

    #[error("room service returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("room service unreachable: {0}")]
    Transport(String),

    #[error("unexpected room service response: {0}")]
    Decode(String),

    #[error("cannot sign room service request: {0}")]
    Auth(String),
}

// ============================================================================
// Room service data types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    pub metadata: String,
}

/// A room as listed by the room service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomInfo {
    #[serde(default)]
    pub sid: String,
    pub name: String,
    /// Opaque JSON blob set at creation
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub num_participants: u32,
}

/// A participant currently connected to a room
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParticipantInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub name: String,
    /// Join time in epoch milliseconds; 0 when unknown
    #[serde(default, deserialize_with = "int64_lenient")]
    pub joined_at: i64,
}

impl ParticipantInfo {
    /// Join time as an ISO-8601 string
    pub fn joined_at_iso(&self) -> Option<String> {
        millis_to_iso(self.joined_at)
    }
}

/// Convert epoch milliseconds to RFC 3339; zero or out-of-range is `None`
pub fn millis_to_iso(millis: i64) -> Option<String> {
    if millis <= 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// protojson encodes int64 as a string; plain JSON encoders use numbers
fn int64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        Text(String),
    }

    match Option::<Int64>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Int64::Number(n)) => Ok(n),
        Some(Int64::Text(s)) if s.is_empty() => Ok(0),
        Some(Int64::Text(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// Room service trait + LiveKit Twirp client
// ============================================================================

/// Narrow view of the external real-time room service
#[async_trait]
pub trait RoomService: Send + Sync {
    async fn create_room(&self, request: &CreateRoomRequest) -> Result<RoomInfo, RoomServiceError>;

    /// An empty `names` slice lists every active room
    async fn list_rooms(&self, names: &[String]) -> Result<Vec<RoomInfo>, RoomServiceError>;

    async fn list_participants(&self, room: &str) -> Result<Vec<ParticipantInfo>, RoomServiceError>;
}

#[derive(Debug, Deserialize)]
struct ListRoomsResponse {
    #[serde(default)]
    rooms: Vec<RoomInfo>,
}

#[derive(Debug, Deserialize)]
struct ListParticipantsResponse {
    #[serde(default)]
    participants: Vec<ParticipantInfo>,
}

#[derive(Debug, Deserialize)]
struct TwirpError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
}

/// Room service client speaking the LiveKit Twirp JSON protocol
pub struct LiveKitRoomClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenIssuer>,
}

impl LiveKitRoomClient {
    pub fn new(
        server_url: &str,
        tokens: Arc<TokenIssuer>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build room service HTTP client")?;

        Ok(Self {
            http,
            base_url: api_base_url(server_url),
            tokens,
        })
    }

    pub fn from_config(config: &LiveKitConfig, tokens: Arc<TokenIssuer>) -> anyhow::Result<Self> {
        Self::new(&config.url, tokens, config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<Req, Resp>(
        &self,
        method: &str,
        room: Option<&str>,
        body: &Req,
    ) -> Result<Resp, RoomServiceError>
    where
        Req: Serialize + ?Sized,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}/twirp/livekit.RoomService/{}", self.base_url, method);
        let token = self
            .tokens
            .issue_service_token(room)
            .map_err(|e| RoomServiceError::Auth(e.to_string()))?;

        debug!("Room service call: {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| RoomServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| RoomServiceError::Decode(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let twirp = serde_json::from_str::<TwirpError>(&text).ok();
        if status == StatusCode::CONFLICT
            || twirp.as_ref().is_some_and(|e| e.code == "already_exists")
        {
            return Err(RoomServiceError::AlreadyExists);
        }

        Err(RoomServiceError::Http {
            status: status.as_u16(),
            message: twirp.map(|e| e.msg).unwrap_or(text),
        })
    }
}

#[async_trait]
impl RoomService for LiveKitRoomClient {
    async fn create_room(&self, request: &CreateRoomRequest) -> Result<RoomInfo, RoomServiceError> {
        self.call("CreateRoom", Some(&request.name), request).await
    }

    async fn list_rooms(&self, names: &[String]) -> Result<Vec<RoomInfo>, RoomServiceError> {
        let body = serde_json::json!({ "names": names });
        let response: ListRoomsResponse = self.call("ListRooms", None, &body).await?;
        Ok(response.rooms)
    }

    async fn list_participants(&self, room: &str) -> Result<Vec<ParticipantInfo>, RoomServiceError> {
        let body = serde_json::json!({ "room": room });
        let response: ListParticipantsResponse =
            self.call("ListParticipants", Some(room), &body).await?;
        Ok(response.participants)
    }
}

/// `wss://host` → `https://host`, `ws://host` → `http://host`
pub fn api_base_url(server_url: &str) -> String {
    let trimmed = server_url.trim().trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// Room provisioning
// ============================================================================

/// Coarse session status carried in room metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    WaitingForAgent,
    AgentConnected,
    InProgress,
    Completed,
}

/// Metadata document attached to every interview room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub candidate_id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub status: RoomStatus,
}

impl RoomMetadata {
    pub fn interview(candidate_id: Option<&str>, job_id: Option<&str>) -> Self {
        Self {
            kind: "interview".to_string(),
            candidate_id: candidate_id.unwrap_or("unknown").to_string(),
            job_id: job_id.unwrap_or("unknown").to_string(),
            started_at: Utc::now(),
            status: RoomStatus::WaitingForAgent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExisted,
}

/// Idempotent "create or confirm exists" for interview rooms
pub struct RoomProvisioner {
    rooms: Arc<dyn RoomService>,
    max_participants: Option<u32>,
}

impl RoomProvisioner {
    pub fn new(rooms: Arc<dyn RoomService>, max_participants: Option<u32>) -> Self {
        Self {
            rooms,
            max_participants,
        }
    }

    pub async fn ensure_room(
        &self,
        name: &str,
        metadata: &RoomMetadata,
    ) -> Result<ProvisionOutcome, RoomServiceError> {
        let request = CreateRoomRequest {
            name: name.to_string(),
            max_participants: self.max_participants,
            metadata: serde_json::to_string(metadata)
                .map_err(|e| RoomServiceError::Decode(e.to_string()))?,
        };

        match self.rooms.create_room(&request).await {
            Ok(room) => {
                info!("Created room {} (sid={})", name, room.sid);
                Ok(ProvisionOutcome::Created)
            }
            Err(RoomServiceError::AlreadyExists) => {
                info!("Room {} already exists, reusing it", name);
                Ok(ProvisionOutcome::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_url_maps_websocket_schemes() {
        assert_eq!(api_base_url("wss://x.livekit.cloud/"), "https://x.livekit.cloud");
        assert_eq!(api_base_url("ws://localhost:7880"), "http://localhost:7880");
        assert_eq!(api_base_url("https://already.http"), "https://already.http");
    }

    #[test]
    fn test_participant_joined_at_accepts_string_and_number() {
        let from_string: ParticipantInfo =
            serde_json::from_str(r#"{"identity":"candidate-1","joined_at":"1700000000000"}"#).unwrap();
        let from_number: ParticipantInfo =
            serde_json::from_str(r#"{"identity":"candidate-1","joined_at":1700000000000}"#).unwrap();
        let missing: ParticipantInfo = serde_json::from_str(r#"{"identity":"x"}"#).unwrap();

        assert_eq!(from_string.joined_at, 1_700_000_000_000);
        assert_eq!(from_number.joined_at, 1_700_000_000_000);
        assert_eq!(missing.joined_at, 0);
    }

    #[test]
    fn test_millis_to_iso() {
        assert_eq!(
            millis_to_iso(1_700_000_000_123).as_deref(),
            Some("2023-11-14T22:13:20.123Z")
        );
        assert_eq!(millis_to_iso(0), None);
    }

    #[test]
    fn test_metadata_defaults_unknown_ids() {
        let meta = RoomMetadata::interview(None, Some("job-9"));
        let json = serde_json::to_value(&meta).unwrap();

        assert_eq!(json["type"], "interview");
        assert_eq!(json["candidateId"], "unknown");
        assert_eq!(json["jobId"], "job-9");
        assert_eq!(json["status"], "waiting_for_agent");
        assert!(json["startedAt"].is_string());
    }
}
