use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::changefeed::FeedError;
use crate::livekit::{RoomServiceError, TokenError, WebhookError};
use crate::report::ReportError;
use crate::session::{StartError, StatusError};
use crate::transcript::TranscriptError;

/// Errors surfaced to HTTP callers.
///
/// Status codes are reserved for request-shape problems and real
/// unavailability. Degraded answers ("room not found", "status unknown")
/// are successful responses and never pass through here.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// Malformed or missing input (400)
    #[error("{message}")]
    Validation {
        field: Option<&'static str>,
        message: String,
    },

    /// Missing credentials on an authenticated endpoint (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Required configuration absent (500)
    #[error("{0}")]
    Configuration(String),

    /// An upstream service could not be reached (503)
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation {
                field: Some(field), ..
            } => json!({ "success": false, "error": self.to_string(), "field": field }),
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                json!({ "success": false, "error": format!("{:#}", e) })
            }
            _ => json!({ "success": false, "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::MissingKeys | TokenError::InvalidKey(_) => ApiError::Configuration(
                format!("LiveKit credentials not configured: {}", e),
            ),
            other => ApiError::Internal(anyhow::Error::new(other).context("token signing failed")),
        }
    }
}

impl From<StartError> for ApiError {
    fn from(e: StartError) -> Self {
        match e {
            StartError::MissingRoomName => ApiError::validation("roomName", e.to_string()),
            StartError::InvalidInvitationId(_) => {
                ApiError::validation("invitationId", e.to_string())
            }
            StartError::Token(token) => token.into(),
            StartError::Room(room) => {
                ApiError::Unavailable(format!("Failed to create interview room: {}", room))
            }
        }
    }
}

impl From<RoomServiceError> for ApiError {
    fn from(e: RoomServiceError) -> Self {
        ApiError::Unavailable(format!("Failed to list sessions: {}", e))
    }
}

impl From<StatusError> for ApiError {
    fn from(e: StatusError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<TranscriptError> for ApiError {
    fn from(e: TranscriptError) -> Self {
        match e {
            TranscriptError::Store(store) => {
                ApiError::Internal(anyhow::Error::new(store).context("transcript storage failed"))
            }
            other => ApiError::Validation {
                field: other.field(),
                message: other.to_string(),
            },
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Store(store) => {
                ApiError::Internal(anyhow::Error::new(store).context("report storage failed"))
            }
            other => ApiError::Validation {
                field: other.field(),
                message: other.to_string(),
            },
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        if e.is_unauthenticated() {
            ApiError::Unauthorized(e.to_string())
        } else {
            ApiError::bad_request(e.to_string())
        }
    }
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::NoTables | FeedError::UnknownMount { .. } => {
                ApiError::bad_request(e.to_string())
            }
            FeedError::Source(_) => ApiError::Unavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::validation("transcript", "empty").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("no header".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Configuration("keys".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Unavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_transcript_errors_name_the_field() {
        let err: ApiError = TranscriptError::Empty.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        match err {
            ApiError::Validation { field, .. } => assert_eq!(field, Some("transcript")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_webhook_errors_split_401_and_400() {
        let missing: ApiError = WebhookError::MissingAuthorization.into();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let mismatch: ApiError = WebhookError::BodyHashMismatch.into();
        assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);

        let malformed: ApiError = WebhookError::MalformedAuthorization.into();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_room_service_errors_are_unavailable() {
        let err: ApiError = RoomServiceError::Transport("timed out".into()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_missing_keys_is_configuration_error() {
        let err: ApiError = StartError::Token(TokenError::MissingKeys).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("not configured"));
    }
}
