use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentDispatcher, DispatchOutcome};
use crate::livekit::{
    Capabilities, ProvisionOutcome, RoomMetadata, RoomProvisioner, RoomServiceError, TokenError,
    TokenIssuer,
};
use crate::store::{parse_uuid, Database, InvitationStatus, NewSession};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("roomName is required")]
    MissingRoomName,

    #[error("Invalid invitationId format. Expected a UUID, got \"{0}\"")]
    InvalidInvitationId(String),

    #[error("failed to mint agent token: {0}")]
    Token(#[from] TokenError),

    #[error("failed to provision room: {0}")]
    Room(#[from] RoomServiceError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInterviewRequest {
    pub room_name: Option<String>,
    pub candidate_id: Option<String>,
    pub job_id: Option<String>,
    /// When present, the session is recorded against this invitation
    pub invitation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub success: bool,
    pub room_name: String,
    pub agent_token: String,
    pub agent_identity: String,
    pub room_created: bool,
    pub agent_dispatched: bool,
    pub message: String,
}

/// Starts an interview session: agent credential, room, agent dispatch.
///
/// Only token and room failures abort the start. Agent dispatch and the
/// invitation bookkeeping are best-effort.
pub struct SessionStarter {
    tokens: Arc<TokenIssuer>,
    rooms: RoomProvisioner,
    agents: AgentDispatcher,
    db: Database,
}

impl SessionStarter {
    pub fn new(
        tokens: Arc<TokenIssuer>,
        rooms: RoomProvisioner,
        agents: AgentDispatcher,
        db: Database,
    ) -> Self {
        Self {
            tokens,
            rooms,
            agents,
            db,
        }
    }

    pub async fn start(&self, request: StartInterviewRequest) -> Result<StartedSession, StartError> {
        let room_name = request
            .room_name
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(StartError::MissingRoomName)?
            .to_string();
        let candidate_id = request.candidate_id.as_deref().filter(|c| !c.is_empty());
        let job_id = request.job_id.as_deref().filter(|j| !j.is_empty());

        let invitation_id = match request.invitation_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                parse_uuid(raw).ok_or_else(|| StartError::InvalidInvitationId(raw.to_string()))?,
            ),
            _ => None,
        };

        info!("Starting interview in room {}", room_name);

        let agent_identity = self.tokens.agent_identity();
        let agent_token = self
            .tokens
            .issue(&room_name, &agent_identity, Capabilities::full())?;

        let metadata = RoomMetadata::interview(candidate_id, job_id);
        let outcome = self.rooms.ensure_room(&room_name, &metadata).await?;

        let dispatch = self.agents.dispatch(&room_name, candidate_id, job_id).await;

        if let Some(invitation_id) = invitation_id {
            self.record_session(invitation_id, &room_name, candidate_id, job_id)
                .await;
        }

        let message = match dispatch {
            DispatchOutcome::Dispatched { .. } => {
                "Interview started successfully. AI agent will join shortly."
            }
            DispatchOutcome::Failed { .. } => {
                "Interview started. The AI agent could not be reached yet and may join later."
            }
        };

        Ok(StartedSession {
            success: true,
            room_name,
            agent_token,
            agent_identity,
            room_created: outcome == ProvisionOutcome::Created,
            agent_dispatched: dispatch.is_dispatched(),
            message: message.to_string(),
        })
    }

    /// Bind the room to the invitation and move it to `started`
    async fn record_session(
        &self,
        invitation_id: Uuid,
        room_name: &str,
        candidate_id: Option<&str>,
        job_id: Option<&str>,
    ) {
        let company_id = match self.db.get_invitation(invitation_id).await {
            Ok(Some(invitation)) => Some(invitation.company_id),
            Ok(None) => {
                warn!("Invitation {} not found, recording session anyway", invitation_id);
                None
            }
            Err(e) => {
                warn!("Could not read invitation {}: {}", invitation_id, e);
                None
            }
        };

        let session = NewSession {
            invitation_id,
            room_id: room_name.to_string(),
            company_id,
            candidate_id: candidate_id.map(str::to_string),
            job_id: job_id.map(str::to_string),
        };
        if let Err(e) = self.db.upsert_session(session).await {
            warn!(
                "Failed to record session for invitation {}: {}",
                invitation_id, e
            );
            return;
        }

        match self
            .db
            .advance_invitation(invitation_id, InvitationStatus::Started)
            .await
        {
            Ok(true) => info!("Invitation {} marked started", invitation_id),
            Ok(false) => {}
            Err(e) => warn!(
                "Failed to mark invitation {} started: {}",
                invitation_id, e
            ),
        }
    }
}
