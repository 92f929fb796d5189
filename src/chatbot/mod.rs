//! Chatbot module - transcripts, reply sources, and the XMPP session.

pub mod context;
pub mod database;
pub mod generator;
pub mod message;
pub mod tracker;
pub mod transcript;
pub mod xmpp;

#[cfg(test)]
mod tests;

pub use context::BotContext;
pub use database::{ReplyStore, StoreError};
pub use generator::{CharRnn, LstmModel, ReplyGenerator};
pub use message::{IncomingMessage, MessageKind};
pub use tracker::{MentionTracker, TrackerConfig};
pub use transcript::{Direction, TranscriptLogger};
pub use xmpp::{Session, SessionConfig, SessionEnd};
