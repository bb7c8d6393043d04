//! Room service integration
//!
//! - `token` - access token minting and verification
//! - `room` - room service client and idempotent room provisioning
//! - `webhook` - signed event callbacks from the room service

pub mod room;
pub mod token;
pub mod webhook;

pub use room::{
    CreateRoomRequest, LiveKitRoomClient, ParticipantInfo, ProvisionOutcome, RoomInfo, RoomMetadata,
    RoomProvisioner, RoomService, RoomServiceError, RoomStatus,
};
pub use token::{
    Capabilities, Claims, TokenError, TokenIssuer, VideoGrant, AGENT_IDENTITY_PREFIX,
    CANDIDATE_IDENTITY_PREFIX,
};
pub use webhook::{sign_webhook, WebhookError, WebhookEvent, WebhookIngestor};
