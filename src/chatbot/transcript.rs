//! Per-peer conversation transcripts.
//!
//! Every peer (a contact's bare address or a room address) gets one plain
//! text file under the account's log directory. Entries look like:
//!
//! ```text
//! (18.10.2026 21:04:11) alice: hello
//!
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("refusing to log to peer '{0}'")]
    InvalidPeer(String),
    #[error("failed to create log directory '{}': {source}", path.display())]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("failed to append to '{}': {source}", path.display())]
    Append { path: PathBuf, source: std::io::Error },
}

/// Whether a transcript entry was received or sent by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Appends transcript entries below one account directory.
pub struct TranscriptLogger {
    dir: PathBuf,
    /// Speaker name used for outbound entries (the account's node part).
    own_name: String,
}

impl TranscriptLogger {
    /// Create `<root>/<account>` and return a logger writing there.
    pub fn create(root: &Path, account: &str, own_name: &str) -> Result<Self, TranscriptError> {
        check_peer(account)?;
        let dir = root.join(account);
        std::fs::create_dir_all(&dir)
            .map_err(|source| TranscriptError::CreateDir { path: dir.clone(), source })?;
        debug!("Transcripts go to {:?}", dir);
        Ok(Self { dir, own_name: own_name.to_string() })
    }

    /// Logger writing directly into `dir`, which must already exist.
    pub fn in_dir(dir: PathBuf, own_name: &str) -> Self {
        Self { dir, own_name: own_name.to_string() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, peer: &str) -> Result<PathBuf, TranscriptError> {
        check_peer(peer)?;
        Ok(self.dir.join(peer))
    }

    /// Append one entry to the peer's transcript.
    pub fn record(
        &self,
        peer: &str,
        speaker_nick: &str,
        body: &str,
        direction: Direction,
    ) -> Result<(), TranscriptError> {
        self.record_at(Local::now(), peer, speaker_nick, body, direction)
    }

    pub fn record_at(
        &self,
        at: DateTime<Local>,
        peer: &str,
        speaker_nick: &str,
        body: &str,
        direction: Direction,
    ) -> Result<(), TranscriptError> {
        let path = self.path_for(peer)?;
        let nick = match direction {
            Direction::Inbound => speaker_nick,
            Direction::Outbound => self.own_name.as_str(),
        };
        let entry = format_entry(at, nick, body);

        // One write per entry so a single line is never interleaved with
        // another appender on the same file.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TranscriptError::Append { path: path.clone(), source })?;
        file.write_all(entry.as_bytes())
            .map_err(|source| TranscriptError::Append { path, source })
    }
}

fn format_entry(at: DateTime<Local>, nick: &str, body: &str) -> String {
    let mut entry = format!("({}) ", at.format(TIMESTAMP_FORMAT));
    if !nick.is_empty() {
        entry.push_str(nick);
        entry.push_str(": ");
    }
    entry.push_str(body);
    entry.push_str("\n\n");
    entry
}

fn check_peer(peer: &str) -> Result<(), TranscriptError> {
    if peer.is_empty() || peer == "." || peer == ".." || peer.contains(['/', '\\']) {
        return Err(TranscriptError::InvalidPeer(peer.to_string()));
    }
    Ok(())
}
