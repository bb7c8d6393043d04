use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::LiveKitConfig;

type HmacSha256 = Hmac<Sha256>;

/// Identity prefix shared by every server-issued agent credential
pub const AGENT_IDENTITY_PREFIX: &str = "interview-agent";

/// Identity prefix used by human participants
pub const CANDIDATE_IDENTITY_PREFIX: &str = "candidate";

/// Allowed clock skew when checking `nbf` / `exp`
const CLOCK_LEEWAY_SECS: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("signing keys are not configured")]
    MissingKeys,

    #[error("signing key rejected: {0}")]
    InvalidKey(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature does not match")]
    BadSignature,

    #[error("token issued by unknown key {0}")]
    UnknownIssuer(String),

    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,
}

/// What a participant may do inside a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub publish: bool,
    pub subscribe: bool,
    pub data: bool,
}

impl Capabilities {
    /// Publish, subscribe and data rights
    pub const fn full() -> Self {
        Self {
            publish: true,
            subscribe: true,
            data: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Room permissions embedded in a token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_join: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_publish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_subscribe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_publish_data: Option<bool>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_create: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_list: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub room_admin: bool,
}

impl VideoGrant {
    /// Grant to join `room` with the given capabilities
    pub fn join(room: &str, caps: Capabilities) -> Self {
        Self {
            room: Some(room.to_string()),
            room_join: true,
            can_publish: Some(caps.publish),
            can_subscribe: Some(caps.subscribe),
            can_publish_data: Some(caps.data),
            ..Self::default()
        }
    }

    /// Server-to-server grant for room administration calls
    pub fn service(room: Option<&str>) -> Self {
        Self {
            room: room.map(str::to_string),
            room_create: true,
            room_list: true,
            room_admin: true,
            ..Self::default()
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            publish: self.can_publish.unwrap_or(false),
            subscribe: self.can_subscribe.unwrap_or(false),
            data: self.can_publish_data.unwrap_or(false),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// JWT claim set understood by the room service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// API key that signed the token
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoGrant>,
    /// Base64 SHA-256 of a webhook body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Mints and verifies HS256 room access tokens.
///
/// Pure: output depends only on the inputs, the clock and the configured
/// secret.
pub struct TokenIssuer {
    api_key: String,
    api_secret: String,
    ttl: Duration,
    agent_sequence: AtomicU64,
}

impl TokenIssuer {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, TokenError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.trim().is_empty() || api_secret.trim().is_empty() {
            return Err(TokenError::MissingKeys);
        }

        Ok(Self {
            api_key,
            api_secret,
            ttl,
            agent_sequence: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &LiveKitConfig) -> Result<Self, TokenError> {
        Self::new(&config.api_key, &config.api_secret, config.token_ttl())
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Access token for `identity` to join `room`
    pub fn issue(
        &self,
        room: &str,
        identity: &str,
        caps: Capabilities,
    ) -> Result<String, TokenError> {
        let claims = self.claims(Some(identity), VideoGrant::join(room, caps));
        self.sign(&claims)
    }

    /// Token for calling the room service API itself
    pub fn issue_service_token(&self, room: Option<&str>) -> Result<String, TokenError> {
        let claims = self.claims(None, VideoGrant::service(room));
        self.sign(&claims)
    }

    /// Unique synthetic identity for an agent joining a room. The suffix is
    /// the wall clock in milliseconds plus a process-local sequence, so two
    /// joins in the same millisecond still differ.
    pub fn agent_identity(&self) -> String {
        let seq = self.agent_sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{}",
            AGENT_IDENTITY_PREFIX,
            Utc::now().timestamp_millis(),
            seq
        )
    }

    fn claims(&self, identity: Option<&str>, grant: VideoGrant) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            iss: self.api_key.clone(),
            sub: identity.map(str::to_string),
            jti: identity.map(str::to_string),
            nbf: now,
            exp: now + self.ttl.as_secs() as i64,
            video: Some(grant),
            sha256: None,
        }
    }

    /// Encode and sign an arbitrary claim set
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let header = serde_json::to_vec(&header).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Malformed(e.to_string()))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Check signature, issuer and validity window, returning the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.trim().split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(TokenError::Malformed("expected three segments".to_string())),
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| TokenError::Malformed(format!("signature: {}", e)))?;

        let mut mac = self.mac()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let header: Header = decode_segment(header)?;
        if header.alg != "HS256" {
            return Err(TokenError::Malformed(format!("unsupported algorithm {}", header.alg)));
        }

        let claims: Claims = decode_segment(payload)?;
        if claims.iss != self.api_key {
            return Err(TokenError::UnknownIssuer(claims.iss));
        }

        let now = Utc::now().timestamp();
        if claims.exp + CLOCK_LEEWAY_SECS < now {
            return Err(TokenError::Expired);
        }
        if claims.nbf - CLOCK_LEEWAY_SECS > now {
            return Err(TokenError::NotYetValid);
        }

        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| TokenError::InvalidKey(e.to_string()))
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
}
