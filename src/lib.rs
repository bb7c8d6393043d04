pub mod agent;
pub mod changefeed;
pub mod config;
pub mod error;
pub mod http;
pub mod livekit;
pub mod nats;
pub mod report;
pub mod session;
pub mod store;
pub mod transcript;

pub use agent::{AgentDispatcher, AgentService, HttpAgentService};
pub use changefeed::{ChangeFeedDispatcher, ChangeNotification, ChangeTable, LocalChangeBus};
pub use config::Config;
pub use error::ApiError;
pub use http::{create_router, AppState};
pub use livekit::{LiveKitRoomClient, RoomService, TokenIssuer, WebhookIngestor};
pub use nats::{ChangeEventMessage, NatsChangeBus};
pub use report::ReportService;
pub use session::{SessionStarter, StatusReconciler};
pub use store::Database;
pub use transcript::TranscriptPersister;
