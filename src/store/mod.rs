//! SQLite persistence for invitations, sessions, transcripts and reports

mod database;
mod invitations;
mod models;
mod reports;
mod sessions;
mod transcripts;

pub use database::{Database, StoreError};
pub use models::{
    format_timestamp, parse_timestamp, parse_uuid, Invitation, InvitationStatus, NewInvitation,
    NewSession, ReportRecord, ReportUpsert, SessionRecord, SessionStatus, StoredMessage,
    TranscriptRecord, TranscriptSnapshot,
};
pub use transcripts::MessageColumn;
