use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::chatbot::TrackerConfig;

/// Longest quiet period a `chrono::Duration` can hold.
pub const MAX_QUIET_PERIOD_MINUTES: u64 = (i64::MAX / 60_000) as u64;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    /// Root directory for transcripts.
    log_path: Option<String>,
    room: Option<String>,
    nick: Option<String>,
    /// File with extra nicks, one per line.
    aliases_file: Option<String>,
    /// SQLite file holding canned replies.
    reply_db: Option<String>,
    you_words: Option<Vec<String>>,
    /// Minutes of silence before an unsolicited reply.
    quiet_period_minutes: Option<u64>,
    idle_after_hour: Option<u32>,
    idle_before_hour: Option<u32>,
    #[serde(default)]
    reply_in_private: bool,
    model: Option<ModelFile>,
}

#[derive(Deserialize)]
struct ModelFile {
    architecture: String,
    weights: String,
    diversity: Option<f64>,
    max_length: Option<usize>,
}

/// Char model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub architecture: PathBuf,
    pub weights: PathBuf,
    /// Sampling temperature.
    pub diversity: f64,
    /// Upper bound on generated characters.
    pub max_length: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_root: PathBuf,
    pub room: Option<String>,
    pub nick: String,
    pub aliases_file: PathBuf,
    pub reply_db: PathBuf,
    pub you_words: Vec<String>,
    pub quiet_period_minutes: u64,
    pub idle_after_hour: u32,
    pub idle_before_hour: u32,
    pub reply_in_private: bool,
    /// `None` disables generation; replies then come from the store only.
    pub model: Option<ModelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("logs"),
            room: None,
            nick: "kcuf".to_string(),
            aliases_file: PathBuf::from("my_nicks"),
            reply_db: PathBuf::from("ready_replies.db"),
            you_words: vec!["you".to_string()],
            quiet_period_minutes: 5 * 60,
            idle_after_hour: 12,
            idle_before_hour: 3,
            reply_in_private: false,
            model: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let model = file
            .model
            .map(|m| ModelConfig {
                architecture: expand_home(&m.architecture),
                weights: expand_home(&m.weights),
                diversity: m.diversity.unwrap_or(1.0),
                max_length: m.max_length.unwrap_or(1000),
            });

        let config = Self {
            log_root: file.log_path.map(|p| expand_home(&p)).unwrap_or(defaults.log_root),
            room: file.room,
            nick: file.nick.unwrap_or(defaults.nick),
            aliases_file: file.aliases_file.map(|p| expand_home(&p)).unwrap_or(defaults.aliases_file),
            reply_db: file.reply_db.map(|p| expand_home(&p)).unwrap_or(defaults.reply_db),
            you_words: file.you_words.unwrap_or(defaults.you_words),
            quiet_period_minutes: file.quiet_period_minutes.unwrap_or(defaults.quiet_period_minutes),
            idle_after_hour: file.idle_after_hour.unwrap_or(defaults.idle_after_hour),
            idle_before_hour: file.idle_before_hour.unwrap_or(defaults.idle_before_hour),
            reply_in_private: file.reply_in_private,
            model,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants. Call again after applying command line overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nick.trim().is_empty() {
            return Err(ConfigError::Validation("nick must not be empty".into()));
        }
        if self.nick.contains('/') {
            return Err(ConfigError::Validation("nick must not contain '/'".into()));
        }
        if self.idle_after_hour > 24 || self.idle_before_hour > 24 {
            return Err(ConfigError::Validation("idle hours must be between 0 and 24".into()));
        }
        if self.quiet_period_minutes > MAX_QUIET_PERIOD_MINUTES {
            return Err(ConfigError::Validation(format!(
                "quiet_period_minutes must be at most {MAX_QUIET_PERIOD_MINUTES}, got {}",
                self.quiet_period_minutes
            )));
        }
        if let Some(ref model) = self.model {
            if !(model.diversity.is_finite() && model.diversity > 0.0) {
                return Err(ConfigError::Validation(format!(
                    "model diversity must be positive, got {}",
                    model.diversity
                )));
            }
            if model.max_length == 0 {
                return Err(ConfigError::Validation("model max_length must be at least 1".into()));
            }
        }
        Ok(())
    }

    /// Tracker settings for this config plus the loaded aliases.
    pub fn tracker_config(&self, aliases: Vec<String>) -> TrackerConfig {
        TrackerConfig {
            nick: self.nick.clone(),
            aliases,
            you_words: self.you_words.clone(),
            // Clamped so an unvalidated config cannot overflow the duration.
            quiet_period: chrono::Duration::minutes(self.quiet_period_minutes.min(MAX_QUIET_PERIOD_MINUTES) as i64),
            idle_after: self.idle_after_hour,
            idle_before: self.idle_before_hour,
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Read extra nicks from `path`, one per line. A missing file means none.
pub fn load_aliases(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let aliases: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();
            info!("Bot's nicks: {:?}", aliases);
            aliases
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No aliases file at {:?}", path);
            Vec::new()
        }
        Err(e) => {
            warn!("Failed to read aliases from {:?}: {e}", path);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("{}");
        let config = Config::load(file.path()).expect("should load empty config");
        assert_eq!(config.nick, "kcuf");
        assert_eq!(config.log_root, PathBuf::from("logs"));
        assert_eq!(config.reply_db, PathBuf::from("ready_replies.db"));
        assert_eq!(config.quiet_period_minutes, 300);
        assert_eq!((config.idle_after_hour, config.idle_before_hour), (12, 3));
        assert_eq!(config.you_words, vec!["you".to_string()]);
        assert!(config.model.is_none());
        assert!(!config.reply_in_private);
    }

    #[test]
    fn test_full_config() {
        let file = write_config(r#"{
            "log_path": "/var/log/kcuf",
            "room": "room@muc.example.com",
            "nick": "bot",
            "you_words": ["you", "ты"],
            "quiet_period_minutes": 60,
            "idle_after_hour": 1,
            "idle_before_hour": 6,
            "reply_in_private": true,
            "model": {"architecture": "arch.json", "weights": "w.bin", "diversity": 0.5}
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.room.as_deref(), Some("room@muc.example.com"));
        assert_eq!(config.nick, "bot");
        assert!(config.reply_in_private);

        let model = config.model.clone().unwrap();
        assert_eq!(model.diversity, 0.5);
        assert_eq!(model.max_length, 1000);

        let tracker = config.tracker_config(vec!["robot".into()]);
        assert_eq!(tracker.quiet_period, chrono::Duration::hours(1));
        assert_eq!(tracker.aliases, vec!["robot".to_string()]);
        assert!(tracker.idle_window_satisfiable());
    }

    #[test]
    fn test_zero_diversity_rejected() {
        let file = write_config(r#"{"model": {"architecture": "a", "weights": "w", "diversity": 0}}"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("diversity"));
    }

    #[test]
    fn test_empty_nick_rejected() {
        let file = write_config(r#"{"nick": "  "}"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("nick"));
    }

    #[test]
    fn test_bad_hour_rejected() {
        let file = write_config(r#"{"idle_after_hour": 25}"#);
        assert!(matches!(assert_err(Config::load(file.path())), ConfigError::Validation(_)));
    }

    #[test]
    fn test_huge_quiet_period_rejected() {
        for minutes in [u64::MAX, 1 << 62, MAX_QUIET_PERIOD_MINUTES + 1] {
            let file = write_config(&format!(r#"{{"quiet_period_minutes": {minutes}}}"#));
            let err = assert_err(Config::load(file.path()));
            assert!(err.to_string().contains("quiet_period_minutes"), "{minutes}: {err}");
        }
    }

    #[test]
    fn test_longest_quiet_period_accepted() {
        let file = write_config(&format!(r#"{{"quiet_period_minutes": {MAX_QUIET_PERIOD_MINUTES}}}"#));
        let config = Config::load(file.path()).unwrap();
        let tracker = config.tracker_config(Vec::new());
        assert!(tracker.quiet_period > chrono::Duration::zero());
    }

    #[test]
    fn test_unvalidated_quiet_period_is_clamped() {
        let config = Config { quiet_period_minutes: u64::MAX, ..Config::default() };
        let tracker = config.tracker_config(Vec::new());
        assert_eq!(tracker.quiet_period, chrono::Duration::minutes(MAX_QUIET_PERIOD_MINUTES as i64));
    }

    #[test]
    fn test_home_is_expanded() {
        let file = write_config(r#"{"log_path": "~/kcuf-logs", "reply_db": "plain.db"}"#);
        let config = Config::load(file.path()).unwrap();
        assert!(!config.log_root.starts_with("~"));
        assert!(config.log_root.ends_with("kcuf-logs"));
        assert_eq!(config.reply_db, PathBuf::from("plain.db"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_aliases_file() {
        let file = write_config("kcufbot\n\n  kc  \n");
        assert_eq!(load_aliases(file.path()), vec!["kcufbot".to_string(), "kc".to_string()]);
    }

    #[test]
    fn test_missing_aliases_file() {
        assert!(load_aliases(Path::new("/nonexistent/my_nicks")).is_empty());
    }
}
