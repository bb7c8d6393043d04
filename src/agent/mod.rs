//! Agent execution service
//!
//! - `client` - HTTP client for the start and status endpoints
//! - `dispatcher` - best-effort "join this room" requests

mod client;
mod dispatcher;

pub use client::{AgentService, AgentStartRequest, AgentStatus, HttpAgentService};
pub use dispatcher::{AgentDispatcher, DispatchOutcome};
