use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::client::{AgentService, AgentStartRequest};

/// Result of asking the agent service to join a room.
///
/// Dispatch is best-effort: session start succeeds either way, so this is a
/// plain value rather than a `Result` and callers may ignore it.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The agent service accepted the request
    Dispatched { response: serde_json::Value },
    /// The request failed, timed out or was refused
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched { .. })
    }
}

/// Asks the agent execution service to join interview rooms
pub struct AgentDispatcher {
    agents: Arc<dyn AgentService>,
    timeout: Duration,
}

impl AgentDispatcher {
    pub fn new(agents: Arc<dyn AgentService>, timeout: Duration) -> Self {
        Self { agents, timeout }
    }

    /// Single bounded round trip; every failure mode is logged and reported
    /// as [`DispatchOutcome::Failed`].
    pub async fn dispatch(
        &self,
        room_name: &str,
        candidate_id: Option<&str>,
        job_id: Option<&str>,
    ) -> DispatchOutcome {
        let request = AgentStartRequest {
            room_name: room_name.to_string(),
            candidate_id: candidate_id.map(str::to_string),
            job_id: job_id.map(str::to_string),
        };

        info!("Triggering interview agent for room {}", room_name);

        match tokio::time::timeout(self.timeout, self.agents.start_interview(&request)).await {
            Ok(Ok(response)) => {
                info!("Agent service started for room {}", room_name);
                DispatchOutcome::Dispatched { response }
            }
            Ok(Err(e)) => {
                warn!(
                    "Agent service failed to start for room {}, continuing: {:#}",
                    room_name, e
                );
                DispatchOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
            Err(_) => {
                warn!(
                    "Agent service did not answer within {:?} for room {}, continuing",
                    self.timeout, room_name
                );
                DispatchOutcome::Failed {
                    reason: format!("timed out after {:?}", self.timeout),
                }
            }
        }
    }
}
