// Shared fixtures for the integration tests: an in-memory room service, an
// agent service nobody listens on, and a fully wired application state.

#![allow(dead_code)]

use async_trait::async_trait;
use interview_orchestrator::config::{
    AgentConfig, ChangeFeedConfig, Config, LiveKitConfig, NatsConfig, ServiceConfig,
    StorageConfig,
};
use interview_orchestrator::livekit::{
    CreateRoomRequest, ParticipantInfo, RoomInfo, RoomService, RoomServiceError,
};
use interview_orchestrator::{AppState, Database, HttpAgentService, LocalChangeBus, TokenIssuer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const API_KEY: &str = "devkey";
pub const API_SECRET: &str = "devsecret-for-integration-tests";

pub fn test_config() -> Config {
    Config {
        service: ServiceConfig::default(),
        livekit: LiveKitConfig {
            url: "ws://localhost:7880".to_string(),
            api_key: API_KEY.to_string(),
            api_secret: API_SECRET.to_string(),
            ..LiveKitConfig::default()
        },
        agent: AgentConfig {
            // Discard port; connections are refused immediately
            url: "http://127.0.0.1:9".to_string(),
            timeout_ms: 500,
        },
        storage: StorageConfig::default(),
        nats: NatsConfig::default(),
        change_feed: ChangeFeedConfig::default(),
    }
}

/// Room service kept in memory
#[derive(Default)]
pub struct FakeRooms {
    rooms: Mutex<HashMap<String, (RoomInfo, Vec<ParticipantInfo>)>>,
    created: Mutex<Vec<CreateRoomRequest>>,
}

impl FakeRooms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_participant(&self, room: &str, identity: &str) {
        if let Some((info, participants)) = self.rooms.lock().get_mut(room) {
            participants.push(ParticipantInfo {
                sid: format!("PA_{}", identity),
                identity: identity.to_string(),
                name: identity.to_string(),
                joined_at: 1_700_000_000_000,
            });
            info.num_participants = participants.len() as u32;
        }
    }

    pub fn created(&self) -> Vec<CreateRoomRequest> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl RoomService for FakeRooms {
    async fn create_room(&self, request: &CreateRoomRequest) -> Result<RoomInfo, RoomServiceError> {
        self.created.lock().push(request.clone());

        let mut rooms = self.rooms.lock();
        if rooms.contains_key(&request.name) {
            return Err(RoomServiceError::AlreadyExists);
        }
        let info = RoomInfo {
            sid: format!("RM_{}", request.name),
            name: request.name.clone(),
            metadata: request.metadata.clone(),
            num_participants: 0,
        };
        rooms.insert(request.name.clone(), (info.clone(), Vec::new()));
        Ok(info)
    }

    async fn list_rooms(&self, names: &[String]) -> Result<Vec<RoomInfo>, RoomServiceError> {
        let rooms = self.rooms.lock();
        if names.is_empty() {
            let mut all: Vec<RoomInfo> = rooms.values().map(|(info, _)| info.clone()).collect();
            all.sort_by(|a, b| a.name.cmp(&b.name));
            return Ok(all);
        }
        Ok(names
            .iter()
            .filter_map(|name| rooms.get(name).map(|(info, _)| info.clone()))
            .collect())
    }

    async fn list_participants(&self, room: &str) -> Result<Vec<ParticipantInfo>, RoomServiceError> {
        Ok(self
            .rooms
            .lock()
            .get(room)
            .map(|(_, participants)| participants.clone())
            .unwrap_or_default())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub db: Database,
    pub rooms: Arc<FakeRooms>,
    pub bus: Arc<LocalChangeBus>,
}

pub async fn test_app() -> TestApp {
    let config = Arc::new(test_config());
    let bus = Arc::new(LocalChangeBus::new());
    let db = Database::open_in_memory(bus.clone()).await.unwrap();
    let rooms = FakeRooms::new();
    let agents = Arc::new(
        HttpAgentService::new(&config.agent.url, Duration::from_millis(config.agent.timeout_ms))
            .unwrap(),
    );

    let tokens = Arc::new(TokenIssuer::from_config(&config.livekit).unwrap());
    let state = AppState::new(config, tokens, db.clone(), rooms.clone(), agents, bus.clone());
    TestApp {
        state,
        db,
        rooms,
        bus,
    }
}
