//! Inbound room-service event callbacks.
//!
//! The sender signs a JWT with the shared API secret and puts the base64
//! SHA-256 of the exact request body in its `sha256` claim. Verification
//! therefore needs the raw bytes, before any JSON extractor touches them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::token::{TokenError, TokenIssuer};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing Authorization header")]
    MissingAuthorization,

    #[error("Authorization header is not valid ASCII")]
    MalformedAuthorization,

    #[error("invalid webhook token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("webhook token carries no body hash")]
    MissingBodyHash,

    #[error("webhook body hash mismatch")]
    BodyHashMismatch,

    #[error("cannot decode webhook event: {0}")]
    Decode(String),
}

impl WebhookError {
    /// Unauthenticated (401) as opposed to malformed (400)
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, WebhookError::MissingAuthorization)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookRoom {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookParticipant {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub identity: String,
}

/// A verified room-service event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// e.g. `room_started`, `participant_joined`
    pub event: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<serde_json::Value>,
    #[serde(default)]
    pub room: Option<WebhookRoom>,
    #[serde(default)]
    pub participant: Option<WebhookParticipant>,
}

/// Validates, decodes and fans out webhook events
pub struct WebhookIngestor {
    tokens: Arc<TokenIssuer>,
    events: broadcast::Sender<WebhookEvent>,
}

impl WebhookIngestor {
    pub fn new(tokens: Arc<TokenIssuer>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { tokens, events }
    }

    /// Receive verified events as they arrive
    pub fn subscribe(&self) -> broadcast::Receiver<WebhookEvent> {
        self.events.subscribe()
    }

    pub fn receive(
        &self,
        body: &[u8],
        authorization: Option<&str>,
    ) -> Result<WebhookEvent, WebhookError> {
        let header = authorization
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(WebhookError::MissingAuthorization)?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header);

        let claims = self.tokens.verify(token)?;
        let expected = claims.sha256.ok_or(WebhookError::MissingBodyHash)?;
        let actual = STANDARD.encode(Sha256::digest(body));

        if actual.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
            return Err(WebhookError::BodyHashMismatch);
        }

        let event: WebhookEvent =
            serde_json::from_slice(body).map_err(|e| WebhookError::Decode(e.to_string()))?;

        info!(
            "Webhook received: {} (room={}, participant={})",
            event.event,
            event.room.as_ref().map(|r| r.name.as_str()).unwrap_or("-"),
            event
                .participant
                .as_ref()
                .map(|p| p.identity.as_str())
                .unwrap_or("-"),
        );
        debug!("Webhook body: {}", String::from_utf8_lossy(body));

        // No subscribers is the normal case
        if self.events.send(event.clone()).is_err() {
            debug!("No webhook subscribers for {}", event.event);
        }

        Ok(event)
    }
}

/// Authorization header value for `body`, as the room service would send it
pub fn sign_webhook(tokens: &TokenIssuer, body: &[u8]) -> Result<String, TokenError> {
    let now = chrono::Utc::now().timestamp();
    let claims = super::token::Claims {
        iss: tokens.api_key().to_string(),
        sub: None,
        jti: None,
        nbf: now,
        exp: now + 300,
        video: None,
        sha256: Some(STANDARD.encode(Sha256::digest(body))),
    };
    tokens.sign(&claims)
}
