//! Shared handles the reply logic works against.
//!
//! Built once at startup and owned by the session; the tracker borrows it
//! for each message instead of reaching for globals.

use tracing::warn;

use crate::chatbot::database::ReplyStore;
use crate::chatbot::generator::ReplyGenerator;
use crate::chatbot::transcript::{Direction, TranscriptLogger};

pub struct BotContext {
    pub transcripts: TranscriptLogger,
    pub replies: ReplyStore,
    /// `None` when no model is configured; replies then come from the store only.
    pub generator: Option<Box<dyn ReplyGenerator>>,
}

impl BotContext {
    pub fn new(
        transcripts: TranscriptLogger,
        replies: ReplyStore,
        generator: Option<Box<dyn ReplyGenerator>>,
    ) -> Self {
        Self { transcripts, replies, generator }
    }

    /// Append to a transcript. Failures are logged and otherwise ignored.
    pub fn log(&self, peer: &str, nick: &str, body: &str, direction: Direction) {
        if let Err(e) = self.transcripts.record(peer, nick, body, direction) {
            warn!("Failed to write transcript: {e}");
        }
    }

    /// Next canned reply, or `None` if the store is empty or unreadable.
    pub fn canned_reply(&self) -> Option<String> {
        match self.replies.take_unsent_reply() {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to take canned reply: {e}");
                None
            }
        }
    }

    /// Generated text seeded with `seed`, falling back to a canned reply.
    pub fn generated_or_canned(&mut self, seed: &str) -> Option<String> {
        self.generator
            .as_mut()
            .and_then(|generator| generator.generate(seed))
            .or_else(|| self.canned_reply())
    }
}
