use crate::agent::{AgentDispatcher, AgentService};
use crate::changefeed::{ChangeFeedDispatcher, ChangeSource, FeedSettings};
use crate::config::Config;
use crate::livekit::{RoomProvisioner, RoomService, TokenIssuer, WebhookIngestor};
use crate::report::ReportService;
use crate::session::{SessionStarter, StatusReconciler};
use crate::store::Database;
use crate::transcript::TranscriptPersister;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenIssuer>,
    pub rooms: Arc<dyn RoomService>,
    pub starter: Arc<SessionStarter>,
    pub status: Arc<StatusReconciler>,
    pub webhooks: Arc<WebhookIngestor>,
    pub transcripts: Arc<TranscriptPersister>,
    pub reports: Arc<ReportService>,
    pub feed: Arc<ChangeFeedDispatcher>,
}

impl AppState {
    /// Wire every component from one validated config. The token issuer is
    /// shared with the room service client; upstream services are passed in
    /// so tests can substitute fakes.
    pub fn new(
        config: Arc<Config>,
        tokens: Arc<TokenIssuer>,
        db: Database,
        rooms: Arc<dyn RoomService>,
        agents: Arc<dyn AgentService>,
        changes: Arc<dyn ChangeSource>,
    ) -> Self {
        let agent_timeout = config.agent.timeout();

        let starter = SessionStarter::new(
            Arc::clone(&tokens),
            RoomProvisioner::new(Arc::clone(&rooms), Some(config.livekit.max_participants)),
            AgentDispatcher::new(Arc::clone(&agents), agent_timeout),
            db.clone(),
        );
        let status = StatusReconciler::new(
            agents,
            Arc::clone(&rooms),
            agent_timeout,
            config.livekit.timeout(),
        );
        let feed = ChangeFeedDispatcher::new(changes, FeedSettings::from(&config.change_feed));

        Self {
            webhooks: Arc::new(WebhookIngestor::new(Arc::clone(&tokens))),
            transcripts: Arc::new(TranscriptPersister::new(db.clone())),
            reports: Arc::new(ReportService::new(db)),
            starter: Arc::new(starter),
            status: Arc::new(status),
            feed: Arc::new(feed),
            rooms,
            tokens,
            config,
        }
    }
}
