//! Conversation scenarios run through the tracker with a real store and
//! transcript directory.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, TimeZone};
use tempfile::TempDir;

use super::context::BotContext;
use super::database::ReplyStore;
use super::generator::{CharModel, CharRnn, ReplyGenerator, Vocab};
use super::message::IncomingMessage;
use super::tracker::{MentionTracker, TrackerConfig};
use super::transcript::TranscriptLogger;

const ROOM: &str = "room@muc.example.com";

// ==================== Harness ====================

/// Generator returning a fixed answer and recording the seeds it saw.
struct Scripted {
    answer: Option<String>,
    seeds: Arc<Mutex<Vec<String>>>,
}

impl ReplyGenerator for Scripted {
    fn generate(&mut self, seed: &str) -> Option<String> {
        self.seeds.lock().unwrap().push(seed.to_string());
        self.answer.clone()
    }
}

/// Model that answers "a" followed by a paragraph break.
struct Terse {
    vocab: Vocab,
}

impl Terse {
    fn new() -> Self {
        Self { vocab: Vocab::new("abcdefghijklmnopqrstuvwxyz \n?".chars()) }
    }
}

impl CharModel for Terse {
    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn window(&self) -> usize {
        4
    }

    fn predict(&self, window: &[usize]) -> Vec<f32> {
        let newline = self.vocab.index_of('\n').unwrap();
        let a = self.vocab.index_of('a').unwrap();
        let next = match window.last() {
            Some(&last) if last == a || last == newline => newline,
            _ => a,
        };
        let mut preds = vec![0.0; self.vocab.len()];
        preds[next] = 1.0;
        preds
    }
}

struct TestBot {
    _dir: TempDir,
    tracker: MentionTracker,
    ctx: BotContext,
    now: DateTime<Local>,
}

impl TestBot {
    fn new(replies: &[&str], generator: Option<Box<dyn ReplyGenerator>>) -> Self {
        Self::with_config(TrackerConfig::default(), replies, generator)
    }

    fn with_config(config: TrackerConfig, replies: &[&str], generator: Option<Box<dyn ReplyGenerator>>) -> Self {
        let dir = TempDir::new().unwrap();
        let transcripts = TranscriptLogger::in_dir(dir.path().to_path_buf(), "kcuf");
        Self::build(dir, transcripts, config, replies, generator)
    }

    /// Bot whose transcript directory does not exist, so every append fails.
    fn without_transcripts(replies: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let transcripts = TranscriptLogger::in_dir(dir.path().join("missing"), "kcuf");
        Self::build(dir, transcripts, TrackerConfig::default(), replies, None)
    }

    fn build(
        dir: TempDir,
        transcripts: TranscriptLogger,
        config: TrackerConfig,
        replies: &[&str],
        generator: Option<Box<dyn ReplyGenerator>>,
    ) -> Self {
        let store = ReplyStore::open_in_memory().unwrap();
        store.add_replies(None, replies.iter().copied()).unwrap();

        let start = Local.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        Self {
            _dir: dir,
            tracker: MentionTracker::new(config, start),
            ctx: BotContext::new(transcripts, store, generator),
            now: start,
        }
    }

    /// Deliver a room message one minute after the previous one.
    fn say(&mut self, nick: &str, body: &str) -> Option<String> {
        self.now += chrono::Duration::minutes(1);
        self.say_at(self.now, nick, body)
    }

    fn say_at(&mut self, now: DateTime<Local>, nick: &str, body: &str) -> Option<String> {
        self.now = now;
        let msg = IncomingMessage::group(ROOM, nick, body);
        self.tracker.handle_group_message(&mut self.ctx, &msg, now)
    }

    fn transcript(&self) -> String {
        std::fs::read_to_string(self.ctx.transcripts.path_for(ROOM).unwrap()).unwrap_or_default()
    }
}

fn scripted(answer: Option<&str>) -> (Box<dyn ReplyGenerator>, Arc<Mutex<Vec<String>>>) {
    let seeds = Arc::new(Mutex::new(Vec::new()));
    let generator = Scripted { answer: answer.map(String::from), seeds: seeds.clone() };
    (Box::new(generator), seeds)
}

// ==================== Scenarios ====================

#[test]
fn test_quiet_conversation_gets_no_reply() {
    let mut bot = TestBot::new(&["No."], None);
    assert_eq!(bot.say("alice", "morning"), None);
    assert_eq!(bot.say("bob", "morning alice"), None);
    assert_eq!(bot.say("alice", "how are you?"), None);

    assert_eq!(bot.ctx.replies.unsent_count().unwrap(), 1);
    let log = bot.transcript();
    assert!(log.contains("alice: morning\n\n"));
    assert!(log.contains("bob: morning alice\n\n"));
}

#[test]
fn test_mention_is_answered_from_store() {
    let mut bot = TestBot::new(&["No."], None);
    assert_eq!(bot.say("alice", "kcuf, are you a robot?"), Some("No.".to_string()));
    assert_eq!(bot.ctx.replies.unsent_count().unwrap(), 0);
}

#[test]
fn test_mention_prefers_generator() {
    let (generator, seeds) = scripted(Some("i am what i am"));
    let mut bot = TestBot::new(&["No."], Some(generator));

    assert_eq!(bot.say("alice", "kcuf who are you"), Some("i am what i am".to_string()));
    assert_eq!(seeds.lock().unwrap().as_slice(), ["kcuf who are you"]);
    // Store untouched.
    assert_eq!(bot.ctx.replies.unsent_count().unwrap(), 1);
}

#[test]
fn test_generator_failure_falls_back_to_store() {
    let (generator, seeds) = scripted(None);
    let mut bot = TestBot::new(&["Maybe."], Some(generator));

    assert_eq!(bot.say("alice", "kcuf?"), Some("Maybe.".to_string()));
    assert_eq!(seeds.lock().unwrap().len(), 1);
}

#[test]
fn test_unknown_seed_char_falls_back_to_store() {
    let rnn = CharRnn::new(Terse::new(), 1.0, 50);
    let mut bot = TestBot::new(&["No."], Some(Box::new(rnn)));

    // '!' and ',' are outside the vocabulary.
    assert_eq!(bot.say("alice", "kcuf, hi!"), Some("No.".to_string()));
}

#[test]
fn test_char_model_answers_known_seed() {
    let rnn = CharRnn::new(Terse::new(), 1.0, 50);
    let mut bot = TestBot::new(&["No."], Some(Box::new(rnn)));

    // Uppercase is folded before lookup.
    assert_eq!(bot.say("alice", "kcuf You there?"), Some("a".to_string()));
    assert_eq!(bot.ctx.replies.unsent_count().unwrap(), 1);
}

#[test]
fn test_you_word_right_after_bot_spoke() {
    let mut bot = TestBot::new(&["No.", "Maybe."], None);

    // The bot's own message arrives as a room echo.
    assert_eq!(bot.say("kcuf", "hello all"), None);
    assert!(bot.say("alice", "are you there?").is_some());
    // One message later "you" no longer counts.
    assert_eq!(bot.say("bob", "you?"), None);
    assert_eq!(bot.ctx.replies.unsent_count().unwrap(), 1);
}

#[test]
fn test_own_echo_is_logged_not_answered() {
    let mut bot = TestBot::new(&["No."], None);
    assert_eq!(bot.say("kcuf", "kcuf kcuf kcuf"), None);
    assert_eq!(bot.ctx.replies.unsent_count().unwrap(), 1);
    assert!(bot.transcript().contains("kcuf: kcuf kcuf kcuf"));
}

#[test]
fn test_alias_addresses_bot() {
    let config = TrackerConfig { aliases: vec!["robot".to_string()], ..TrackerConfig::default() };
    let mut bot = TestBot::with_config(config, &["No."], None);
    assert_eq!(bot.say("alice", "is the robot awake"), Some("No.".to_string()));
}

#[test]
fn test_transcript_failure_does_not_stop_replies() {
    let mut bot = TestBot::without_transcripts(&["No.", "Maybe."]);

    assert_eq!(bot.say("kcuf", "hello all"), None);
    assert!(bot.tracker.state().was_last_speaker_me);

    // The lookback still shifts, so "you" counts right after the bot.
    assert!(bot.say("alice", "are you there?").is_some());
    assert_eq!(bot.tracker.state().last_speaker.as_deref(), Some("alice"));
    assert!(bot.tracker.state().was_previous_speaker_me);

    assert!(bot.say("bob", "kcuf!").is_some());
    assert_eq!(bot.ctx.replies.unsent_count().unwrap(), 0);
    assert!(!bot.ctx.transcripts.dir().exists());
}

#[test]
fn test_store_exhaustion() {
    let mut bot = TestBot::new(&["No.", "Maybe."], None);
    let first = bot.say("alice", "kcuf 1").unwrap();
    let second = bot.say("alice", "kcuf 2").unwrap();
    assert_ne!(first, second);
    assert_eq!(bot.say("alice", "kcuf 3"), None);
}

#[test]
fn test_idle_reply_after_long_silence() {
    let config = TrackerConfig { idle_after: 1, idle_before: 6, ..TrackerConfig::default() };
    let mut bot = TestBot::with_config(config, &["No."], None);

    // 00:01, nothing to say.
    assert_eq!(bot.say("alice", "anyone?"), None);
    // Quiet long enough, but hour 6 is outside 1 < hour < 6.
    let at_six = Local.with_ymd_and_hms(2026, 3, 1, 6, 1, 0).unwrap();
    assert_eq!(bot.say_at(at_six, "alice", "still nobody"), None);

    // Silent since 06:01, now 05:00 the next day.
    let next_night = Local.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap();
    assert_eq!(bot.say_at(next_night, "bob", "hello?"), Some("No.".to_string()));
}

#[test]
fn test_idle_reply_never_happens_with_default_window() {
    let mut bot = TestBot::new(&["No."], None);
    for day in 2..5 {
        for hour in [0, 4, 13, 23] {
            let at = Local.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap();
            assert_eq!(bot.say_at(at, "alice", "hello?"), None);
        }
    }
}
