//! Reply decisions for group chats.
//!
//! The tracker remembers who spoke in the last two messages and when the room
//! last had traffic. A message gets a reply when it addresses the bot, or,
//! rarely, when the room has been quiet for long enough at the right hour.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Local, Timelike};
use regex::Regex;
use tracing::{debug, info};

use crate::chatbot::context::BotContext;
use crate::chatbot::message::IncomingMessage;
use crate::chatbot::transcript::Direction;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word regex is valid"));

/// Settings for [`MentionTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// The bot's nick in the room.
    pub nick: String,
    /// Other names that count as addressing the bot.
    pub aliases: Vec<String>,
    /// Words that address the bot right after it spoke (matched as
    /// case-insensitive prefixes of message words).
    pub you_words: Vec<String>,
    /// Silence needed before an unsolicited reply.
    pub quiet_period: Duration,
    /// Unsolicited replies need `idle_after < hour < idle_before`.
    pub idle_after: u32,
    pub idle_before: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            nick: "kcuf".to_string(),
            aliases: Vec::new(),
            you_words: vec!["you".to_string()],
            quiet_period: Duration::hours(5),
            idle_after: 12,
            idle_before: 3,
        }
    }
}

impl TrackerConfig {
    /// Whether any integer hour can pass the idle window check.
    pub fn idle_window_satisfiable(&self) -> bool {
        (0..24).any(|hour| self.idle_after < hour && hour < self.idle_before)
    }
}

/// What the tracker remembers between messages.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub last_speaker: Option<String>,
    pub was_last_speaker_me: bool,
    pub was_previous_speaker_me: bool,
    pub silent_since: DateTime<Local>,
}

/// Why a reply is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyReason {
    Addressed,
    Idle,
}

pub struct MentionTracker {
    config: TrackerConfig,
    state: ConversationState,
}

impl MentionTracker {
    pub fn new(mut config: TrackerConfig, started_at: DateTime<Local>) -> Self {
        config.you_words = config
            .you_words
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        config.aliases.retain(|a| !a.is_empty());

        Self {
            config,
            state: ConversationState {
                last_speaker: None,
                was_last_speaker_me: false,
                was_previous_speaker_me: false,
                silent_since: started_at,
            },
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }

    fn is_me(&self, nick: &str) -> bool {
        nick == self.config.nick
    }

    /// Whether `msg` is meant for the bot, given the current state.
    ///
    /// The bot's own messages never count.
    pub fn is_directly_addressed(&self, msg: &IncomingMessage) -> bool {
        if self.is_me(&msg.sender_nick) {
            return false;
        }

        let body = msg.body.as_str();
        if body.contains(self.config.nick.as_str())
            || self.config.aliases.iter().any(|alias| body.contains(alias.as_str()))
        {
            return true;
        }

        self.state.was_previous_speaker_me && self.mentions_you(body)
    }

    fn mentions_you(&self, body: &str) -> bool {
        WORD.find_iter(body).any(|word| {
            let word = word.as_str().to_lowercase();
            self.config.you_words.iter().any(|you| word.starts_with(you.as_str()))
        })
    }

    /// Whether an unsolicited reply is allowed at `now`.
    pub fn quiet_window_open(&self, now: DateTime<Local>) -> bool {
        let hour = now.hour();
        now.signed_duration_since(self.state.silent_since) > self.config.quiet_period
            && self.config.idle_after < hour
            && hour < self.config.idle_before
    }

    /// Decide whether to answer `msg` and why.
    ///
    /// Call after [`MentionTracker::observe`]; reads state only.
    pub fn reply_reason(&self, msg: &IncomingMessage, now: DateTime<Local>) -> Option<ReplyReason> {
        if self.is_me(&msg.sender_nick) {
            None
        } else if self.is_directly_addressed(msg) {
            Some(ReplyReason::Addressed)
        } else if self.quiet_window_open(now) {
            Some(ReplyReason::Idle)
        } else {
            None
        }
    }

    /// Shift the two-message speaker lookback.
    pub fn observe(&mut self, msg: &IncomingMessage) {
        self.state.was_previous_speaker_me = self.state.was_last_speaker_me;
        self.state.was_last_speaker_me = self.is_me(&msg.sender_nick);
        self.state.last_speaker = Some(msg.sender_nick.clone());
    }

    /// Process one group chat message and return the reply to send, if any.
    pub fn handle_group_message(
        &mut self,
        ctx: &mut BotContext,
        msg: &IncomingMessage,
        now: DateTime<Local>,
    ) -> Option<String> {
        self.observe(msg);
        ctx.log(&msg.sender_id, &msg.sender_nick, &msg.body, Direction::Inbound);

        let reply = match self.reply_reason(msg, now) {
            Some(ReplyReason::Addressed) => {
                info!("Addressed by {} in {}: \"{}\"", msg.sender_nick, msg.sender_id, msg.preview());
                ctx.generated_or_canned(&msg.body)
            }
            Some(ReplyReason::Idle) => {
                info!("{} has been quiet since {}, speaking up", msg.sender_id, self.state.silent_since);
                ctx.canned_reply()
            }
            None => {
                debug!("{} ({}): \"{}\"", msg.sender_nick, msg.sender_id, msg.preview());
                None
            }
        };

        self.state.silent_since = now;
        reply
    }
}
