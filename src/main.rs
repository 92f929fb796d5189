use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use kcuf::chatbot::generator::{CharRnn, LstmModel, ReplyGenerator};
use kcuf::chatbot::xmpp::{self, Session, SessionConfig, SessionEnd};
use kcuf::chatbot::{BotContext, MentionTracker, ReplyStore, TranscriptLogger};
use kcuf::config::{Config, ModelConfig, expand_home, load_aliases};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Critical,
    Error,
    Warning,
    Warn,
    Info,
    Debug,
    Notset,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warning | LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Notset => "trace",
        }
    }
}

/// XMPP conversation bot.
#[derive(Debug, Parser)]
#[command(name = "kcuf", version)]
struct Args {
    /// Account JID, e.g. bot@example.com
    jid: String,

    /// Root directory for transcripts and the log file [default: logs]
    #[arg(long)]
    path: Option<PathBuf>,

    /// Multi-user chat room to join
    #[arg(long)]
    room: Option<String>,

    /// Nick to use in the room [default: kcuf]
    #[arg(long)]
    nick: Option<String>,

    /// File with alternative nicks, one per line [default: my_nicks]
    #[arg(long)]
    aliases: Option<PathBuf>,

    /// Canned reply database [default: ready_replies.db]
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevel::Debug)]
    loglevel: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = args.path {
        config.log_root = expand_home(&path.to_string_lossy());
    }
    if let Some(room) = args.room {
        config.room = Some(room);
    }
    if let Some(nick) = args.nick {
        config.nick = nick;
    }
    if let Some(aliases) = args.aliases {
        config.aliases_file = expand_home(&aliases.to_string_lossy());
    }
    if let Some(db) = args.db {
        config.reply_db = expand_home(&db.to_string_lossy());
    }
    config.validate()?;

    let password = rpassword::prompt_password("Password: ").context("failed to read password")?;

    // Setup logging
    std::fs::create_dir_all(&config.log_root)
        .with_context(|| format!("failed to create {:?}", config.log_root))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_root.join("kcuf.log"))
        .context("failed to open log file")?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let directive = args.loglevel.directive();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(tracing_subscriber::EnvFilter::new(directive)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::EnvFilter::new(directive)),
        )
        .init();

    info!("🚀 Starting kcuf as {}", args.jid);
    if let Some(ref path) = args.config {
        info!("Loaded config from {:?}", path);
    }

    let session = build_session(&config, &args.jid)?;

    match xmpp::run(session, &args.jid, password).await? {
        SessionEnd::Done => println!("Done"),
        SessionEnd::ConnectFailed(reason) => {
            warn!("Connection failed: {reason}");
            println!("Unable to connect");
        }
    }
    Ok(())
}

fn build_session(config: &Config, jid: &str) -> anyhow::Result<Session> {
    let own_name = jid.split('@').next().unwrap_or(jid);
    let transcripts = TranscriptLogger::create(&config.log_root, jid, own_name)?;
    let replies = ReplyStore::open(&config.reply_db)?;
    let generator = config.model.as_ref().and_then(load_generator);
    let ctx = BotContext::new(transcripts, replies, generator);

    let aliases = load_aliases(&config.aliases_file);
    let tracker_config = config.tracker_config(aliases);
    if !tracker_config.idle_window_satisfiable() {
        warn!(
            "Idle window {} < hour < {} can never open; unsolicited replies are disabled",
            tracker_config.idle_after, tracker_config.idle_before
        );
    }
    let tracker = MentionTracker::new(tracker_config, Local::now());

    let session_config = SessionConfig {
        room: config.room.clone(),
        nick: config.nick.clone(),
        reply_in_private: config.reply_in_private,
    };
    if session_config.room.is_none() {
        info!("No room configured, only private chats will be logged");
    }
    Ok(Session::new(session_config, tracker, ctx))
}

/// Load the char model. A broken model is not fatal: the bot falls back to canned replies.
fn load_generator(model: &ModelConfig) -> Option<Box<dyn ReplyGenerator>> {
    match LstmModel::load(&model.architecture, &model.weights) {
        Ok(lstm) => {
            info!("Loaded char model from {:?}", model.weights);
            Some(Box::new(CharRnn::new(lstm, model.diversity, model.max_length)))
        }
        Err(e) => {
            warn!("Failed to load char model, using canned replies only: {e}");
            None
        }
    }
}
