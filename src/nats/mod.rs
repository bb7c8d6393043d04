pub mod client;
pub mod messages;

pub use client::NatsChangeBus;
pub use messages::ChangeEventMessage;
