//! HTTP API for the interview front end, the agent service and the room
//! service:
//! - POST /api/start-interview - Create the room and dispatch the agent
//! - POST /api/token - Mint a room access token
//! - GET /api/agent-status - Reconciled agent/candidate status
//! - GET /api/v1/live-kit - Active rooms on the room service
//! - POST|GET /api/interview-transcript - Save or read a transcript
//! - POST /api/interviews/save-transcript - Save a transcript
//! - POST /api/webhooks/livekit - Signed room service events
//! - POST|GET /api/interview-report - Save or read reports
//! - GET /api/changes/:company_id - Refresh events (SSE)
//! - POST /api/changes/:company_id/mounts/:mount_id/visibility - Visibility transitions
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
