use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::AgentConfig;

/// Body of the agent service's start endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStartRequest {
    pub room_name: String,
    pub candidate_id: Option<String>,
    pub job_id: Option<String>,
}

/// Live interview state as reported by the agent service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default)]
    pub agent_connected: bool,
    #[serde(default)]
    pub current_question: Option<serde_json::Value>,
    #[serde(default)]
    pub interview_progress: f64,
    #[serde(default)]
    pub ai_analysis: Option<serde_json::Value>,
    #[serde(default)]
    pub is_listening: bool,
    #[serde(default)]
    pub is_agent_speaking: bool,
}

/// The external service that runs the automated interviewer
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Ask an agent to join a room
    async fn start_interview(&self, request: &AgentStartRequest) -> Result<serde_json::Value>;

    /// Current status of the interview for a candidate
    async fn interview_status(&self, candidate_id: &str) -> Result<AgentStatus>;
}

/// HTTP client for the agent service
pub struct HttpAgentService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build agent service HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(&config.url, config.timeout())
    }
}

#[async_trait]
impl AgentService for HttpAgentService {
    async fn start_interview(&self, request: &AgentStartRequest) -> Result<serde_json::Value> {
        let url = format!("{}/start-interview", self.base_url);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Agent service unreachable at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Agent service start returned {}", status);
        }

        // Some deployments answer with an empty body
        let body = response.text().await.context("Failed to read agent response")?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).context("Agent service returned invalid JSON")
    }

    async fn interview_status(&self, candidate_id: &str) -> Result<AgentStatus> {
        let url = format!("{}/interview-status/{}", self.base_url, candidate_id);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Agent service unreachable at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Agent status endpoint returned {}", status);
        }

        response
            .json::<AgentStatus>()
            .await
            .context("Agent status response could not be decoded")
    }
}
