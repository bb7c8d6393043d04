use super::state::AppState;
use crate::changefeed::{FeedError, FeedView, MountKey, Visibility};
use crate::error::ApiError;
use crate::livekit::{Capabilities, WebhookError};
use crate::report::{ReportError, SaveReportRequest};
use crate::session::{StartInterviewRequest, StartedSession, StatusQuery, StatusReport};
use crate::transcript::{SaveTranscriptRequest, SavedTranscript, TranscriptLookup};
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub room: Option<String>,
    pub identity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// Room service URL the participant connects to
    pub url: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SaveTranscriptResponse {
    pub success: bool,
    #[serde(flatten)]
    pub saved: SavedTranscript,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    pub invitation_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub invitation_id: Option<String>,
    pub company_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    /// Consuming view instance; generated when absent
    pub mount: Option<String>,
    pub view: Option<FeedView>,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub state: Visibility,
}

fn not_found(message: &str) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// POST /api/start-interview
/// Create (or reuse) the room, mint the agent token and dispatch the agent
pub async fn start_interview(
    State(state): State<AppState>,
    payload: Result<Json<StartInterviewRequest>, JsonRejection>,
) -> Result<Json<StartedSession>, ApiError> {
    let Json(req) = payload?;
    let started = state.starter.start(req).await?;

    info!(
        "Interview started in room {} (agent dispatched: {})",
        started.room_name, started.agent_dispatched
    );
    Ok(Json(started))
}

/// POST /api/token
/// Access token for a participant joining a room
pub async fn mint_token(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(req) = payload?;

    let room = req
        .room
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::validation("room", "room is required"))?;
    let identity = req
        .identity
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .ok_or_else(|| ApiError::validation("identity", "identity is required"))?;

    let token = state.tokens.issue(room, identity, Capabilities::full())?;

    debug!("Issued token for {} in room {}", identity, room);
    Ok(Json(TokenResponse {
        url: state.config.livekit.url.clone(),
        token,
    }))
}

/// GET /api/agent-status?room=..&candidateId=..
/// Always 200 once a target is named; `room_not_found` and `error` are
/// ordinary answers
pub async fn agent_status(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<StatusReport>, ApiError> {
    let Query(query) = query?;
    let report = state.status.status(&query).await?;
    Ok(Json(report))
}

/// POST /api/interview-transcript, POST /api/interviews/save-transcript
/// Full-snapshot save; safe to repeat for the same invitation
pub async fn save_transcript(
    State(state): State<AppState>,
    payload: Result<Json<SaveTranscriptRequest>, JsonRejection>,
) -> Result<Json<SaveTranscriptResponse>, ApiError> {
    let Json(req) = payload?;
    let saved = state.transcripts.save(req).await?;

    let message = format!("Transcript saved with {} messages", saved.message_count);
    Ok(Json(SaveTranscriptResponse {
        success: true,
        saved,
        message,
    }))
}

/// GET /api/interview-transcript?invitation_id=..|room_id=..
pub async fn get_transcript(
    State(state): State<AppState>,
    query: Result<Query<TranscriptQuery>, QueryRejection>,
) -> Result<axum::response::Response, ApiError> {
    let Query(query) = query?;
    let lookup =
        TranscriptLookup::from_query(query.invitation_id.as_deref(), query.room_id.as_deref())?;

    match state.transcripts.find(&lookup).await? {
        Some(transcript) => Ok(Json(json!({
            "success": true,
            "transcript": transcript,
        }))
        .into_response()),
        None => Ok(not_found("Transcript not found")),
    }
}

/// GET /api/v1/live-kit
/// Every active room on the room service, listed with a room-list grant
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rooms = state.rooms.list_rooms(&[]).await?;

    debug!("Listed {} active rooms", rooms.len());
    Ok(Json(json!({
        "success": true,
        "source": "room_service",
        "count": rooms.len(),
        "sessions": rooms,
    })))
}

/// POST /api/webhooks/livekit
/// The body is taken as raw bytes; the signature covers the exact payload
pub async fn livekit_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().map_err(|_| WebhookError::MalformedAuthorization))
        .transpose()?;

    let event = state.webhooks.receive(&body, authorization)?;
    Ok(Json(json!({ "success": true, "event": event.event })))
}

/// POST /api/interview-report
pub async fn save_report(
    State(state): State<AppState>,
    payload: Result<Json<SaveReportRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = payload?;
    let report = state.reports.save(req).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Interview report saved successfully",
        "report": report,
    })))
}

/// GET /api/interview-report?invitation_id=..
/// GET /api/interview-report?company_id=..&limit=..
pub async fn get_report(
    State(state): State<AppState>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<axum::response::Response, ApiError> {
    let Query(query) = query?;
    let invitation_id = query.invitation_id.as_deref().filter(|s| !s.trim().is_empty());
    let company_id = query.company_id.as_deref().filter(|s| !s.trim().is_empty());

    if let Some(invitation_id) = invitation_id {
        return match state.reports.for_invitation(invitation_id).await? {
            Some(report) => Ok(Json(json!({ "success": true, "report": report })).into_response()),
            None => Ok(not_found("Report not found")),
        };
    }

    let company_id = company_id.ok_or(ReportError::MissingLookup)?;
    let reports = state.reports.for_company(company_id, query.limit).await?;
    Ok(Json(json!({
        "success": true,
        "count": reports.len(),
        "reports": reports,
    }))
    .into_response())
}

/// GET /api/changes/:company_id?mount=..&view=..
/// One SSE stream per mount; closing it tears the subscription down
pub async fn change_feed(
    State(state): State<AppState>,
    Path(company_id): Path<String>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let Query(query) = query?;
    let mount_id = query
        .mount
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let view = query.view.unwrap_or(FeedView::All);

    let subscription = state
        .feed
        .subscribe(MountKey::new(company_id, mount_id.clone()), view.tables())
        .await?;

    let opened = Event::default()
        .event("subscribed")
        .json_data(json!({ "mount_id": mount_id, "view": view }));

    let refreshes = stream::unfold(subscription, |mut subscription| async move {
        let refresh = subscription.next_refresh().await?;
        let event = Event::default().event("refresh").json_data(&refresh);
        Some((event, subscription))
    });

    let events = stream::once(async move { opened }).chain(refreshes);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// POST /api/changes/:company_id/mounts/:mount_id/visibility
pub async fn set_visibility(
    State(state): State<AppState>,
    Path((company_id, mount_id)): Path<(String, String)>,
    payload: Result<Json<VisibilityRequest>, JsonRejection>,
) -> Result<axum::response::Response, ApiError> {
    let Json(req) = payload?;
    let key = MountKey::new(company_id, mount_id);

    match state.feed.signal(&key, req.state) {
        Ok(()) => Ok(Json(json!({ "success": true })).into_response()),
        Err(FeedError::UnknownMount { .. }) => Ok(not_found("No active change feed for this mount")),
        Err(e) => Err(e.into()),
    }
}
