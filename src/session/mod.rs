//! Interview session lifecycle
//!
//! - `start` - credential, room provisioning and agent dispatch
//! - `status` - reconciles agent service, participants and room metadata

mod start;
mod status;

pub use start::{SessionStarter, StartError, StartInterviewRequest, StartedSession};
pub use status::{
    ParticipantView, StatusError, StatusKind, StatusQuery, StatusReconciler, StatusReport,
    StatusSource,
};
