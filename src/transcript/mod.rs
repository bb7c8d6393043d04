//! Transcript persistence
//!
//! - `message` - message shape, speaker and timestamp normalisation
//! - `persister` - idempotent snapshot saves and fallback reads
//! - `locks` - per-invitation save serialisation

mod locks;
mod message;
mod persister;

pub use locks::KeyedLocks;
pub use message::{normalize_timestamp, parse_datetime, Message, MessageProblem, Speaker};
pub use persister::{
    MessageReadStrategy, SaveTranscriptRequest, SavedTranscript, TranscriptError,
    TranscriptLookup, TranscriptPersister, TranscriptView,
};
