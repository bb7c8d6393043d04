use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub livekit: LiveKitConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub change_feed: ChangeFeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Room service credentials and room defaults
#[derive(Debug, Clone, Deserialize)]
pub struct LiveKitConfig {
    /// Server URL handed to participants (ws:// or wss://)
    #[serde(default)]
    pub url: String,

    /// API key, used as the token issuer
    #[serde(default)]
    pub api_key: String,

    /// API secret, used to sign tokens and verify webhooks
    #[serde(default)]
    pub api_secret: String,

    #[serde(default = "default_max_participants")]
    pub max_participants: u32,

    /// Lifetime of minted access tokens
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Upper bound on a single room service request
    #[serde(default = "default_room_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            max_participants: default_max_participants(),
            token_ttl_secs: default_token_ttl_secs(),
            timeout_ms: default_room_timeout_ms(),
        }
    }
}

impl LiveKitConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Agent execution service
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_url")]
    pub url: String,
    #[serde(default = "default_agent_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            timeout_ms: default_agent_timeout_ms(),
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// NATS transport for change notifications. Without a URL, notifications
/// stay in-process.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: None,
            subject_prefix: default_subject_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeFeedConfig {
    /// Bursts of notifications inside this window collapse into one refresh
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// A view hidden for longer than this refreshes when it comes back
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for ChangeFeedConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

fn default_service_name() -> String {
    "interview-orchestrator".to_string()
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_room_timeout_ms() -> u64 {
    5000
}

fn default_agent_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_agent_timeout_ms() -> u64 {
    5000
}

fn default_database_path() -> String {
    "data/interviews.db".to_string()
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_stale_after_ms() -> u64 {
    15_000
}

fn default_max_participants() -> u32 {
    10
}

fn default_token_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_subject_prefix() -> String {
    "db.changes".to_string()
}

impl Config {
    /// Load from `<path>.toml` (if present), then `INTERVIEW_*` environment
    /// variables, then the conventional `LIVEKIT_*` variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("INTERVIEW")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;
        cfg.apply_livekit_env();
        Ok(cfg)
    }

    fn apply_livekit_env(&mut self) {
        if let Ok(url) = std::env::var("LIVEKIT_URL") {
            self.livekit.url = url;
        }
        if let Ok(key) = std::env::var("LIVEKIT_API_KEY") {
            self.livekit.api_key = key;
        }
        if let Ok(secret) = std::env::var("LIVEKIT_API_SECRET") {
            self.livekit.api_secret = secret;
        }
    }

    /// Startup check. Nothing in the subsystem can run without room-service
    /// credentials, so every missing value is reported at once.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.livekit.url.trim().is_empty() {
            missing.push("LIVEKIT_URL");
        }
        if self.livekit.api_key.trim().is_empty() {
            missing.push("LIVEKIT_API_KEY");
        }
        if self.livekit.api_secret.trim().is_empty() {
            missing.push("LIVEKIT_API_SECRET");
        }
        if !missing.is_empty() {
            bail!(
                "LiveKit environment variables not configured: set {} (or the livekit section of the config file)",
                missing.join(", ")
            );
        }
        if self.livekit.timeout_ms == 0 {
            bail!("livekit.timeout_ms must be greater than zero");
        }
        if self.change_feed.debounce_ms == 0 {
            bail!("change_feed.debounce_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn livekit() -> LiveKitConfig {
        LiveKitConfig {
            url: "wss://rooms.example.com".to_string(),
            api_key: "APIkey".to_string(),
            api_secret: "secret".to_string(),
            ..LiveKitConfig::default()
        }
    }

    fn base() -> Config {
        Config {
            service: ServiceConfig::default(),
            livekit: livekit(),
            agent: AgentConfig::default(),
            storage: StorageConfig::default(),
            nats: NatsConfig::default(),
            change_feed: ChangeFeedConfig::default(),
        }
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_validate_names_every_missing_key() {
        let mut cfg = base();
        cfg.livekit.api_key.clear();
        cfg.livekit.api_secret = "  ".to_string();

        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("LIVEKIT_API_KEY"));
        assert!(err.contains("LIVEKIT_API_SECRET"));
        assert!(!err.contains("LIVEKIT_URL"));
    }

    #[test]
    fn test_load_from_toml_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[service]
name = "test-orchestrator"
[service.http]
bind = "0.0.0.0"
port = 9000

[livekit]
url = "ws://localhost:7880"
api_key = "devkey"
api_secret = "devsecret"
"#
        )
        .unwrap();

        let stem = dir.path().join("orchestrator");
        let cfg = Config::load(stem.to_str().unwrap()).unwrap();

        assert_eq!(cfg.service.name, "test-orchestrator");
        assert_eq!(cfg.service.http.port, 9000);
        assert_eq!(cfg.livekit.max_participants, 10);
        assert_eq!(cfg.agent.url, "http://localhost:8000");
        assert_eq!(cfg.change_feed.debounce_ms, 300);
        assert_eq!(cfg.change_feed.stale_after_ms, 15_000);
        assert!(cfg.nats.url.is_none());
    }

    #[test]
    fn test_load_partial_sections_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[service.http]
port = 8080

[agent]
url = "http://agent:9000"

[change_feed]
debounce_ms = 50
"#
        )
        .unwrap();

        let stem = dir.path().join("partial");
        let cfg = Config::load(stem.to_str().unwrap()).unwrap();

        assert_eq!(cfg.service.name, "interview-orchestrator");
        assert_eq!(cfg.service.http.bind, "127.0.0.1");
        assert_eq!(cfg.service.http.port, 8080);
        assert_eq!(cfg.agent.url, "http://agent:9000");
        assert_eq!(cfg.agent.timeout_ms, 5000);
        assert_eq!(cfg.change_feed.debounce_ms, 50);
        assert_eq!(cfg.change_feed.stale_after_ms, 15_000);
        assert_eq!(cfg.storage.database_path, "data/interviews.db");
        assert_eq!(cfg.livekit.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_room_timeout() {
        let mut cfg = base();
        cfg.livekit.timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }
}
