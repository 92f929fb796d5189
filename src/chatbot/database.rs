//! Persistent SQLite store of canned replies.
//!
//! Rows are bulk-loaded by the `kcuf-ingest` tool and consumed by the bot,
//! each at most once.

use rand::seq::SliceRandom;
use rusqlite::{Connection, TransactionBehavior, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// How long a second process waits for the write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open reply store '{path}': {source}")]
    Open { path: String, source: rusqlite::Error },
    #[error("reply store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A canned reply row.
#[derive(Debug, Clone, PartialEq)]
pub struct CannedReply {
    pub id: i64,
    pub source: Option<String>,
    pub text: String,
    pub sent: bool,
}

/// Canned reply queue backed by SQLite.
pub struct ReplyStore {
    conn: Mutex<Connection>,
}

impl ReplyStore {
    /// Create a new in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|source| StoreError::Open { path: ":memory:".into(), source })?;
        Self::with_connection(conn)
    }

    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|source| StoreError::Open { path: path.display().to_string(), source })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self::with_connection(conn)?;

        let unsent = store.unsent_count()?;
        let total = store.total_count()?;
        info!("Loaded reply store from {:?} ({} of {} replies unsent)", path, unsent, total);
        Ok(store)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT,
                text TEXT NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_entries_sent ON entries(sent);
        "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Take one unsent reply uniformly at random and mark it sent.
    ///
    /// Selection and update happen in one immediate transaction, so another
    /// process sharing the file cannot be handed the same row.
    pub fn take_unsent_reply(&self) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM entries WHERE sent = 0")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let Some(&id) = ids.choose(&mut rand::thread_rng()) else {
            info!("Reply store exhausted, nothing left to send");
            return Ok(None);
        };

        let text: String =
            tx.query_row("SELECT text FROM entries WHERE id = ?1", params![id], |row| row.get(0))?;
        let updated = tx.execute("UPDATE entries SET sent = 1 WHERE id = ?1 AND sent = 0", params![id])?;
        tx.commit()?;

        debug!("Took canned reply {} ({} were unsent)", id, ids.len());
        // The write lock was held since BEGIN, so the row cannot have been
        // taken by someone else in between.
        debug_assert_eq!(updated, 1);
        Ok(Some(text))
    }

    /// Insert one unsent reply and return its id.
    pub fn add_reply(&self, source: Option<&str>, text: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO entries (source, text, sent, created_at) VALUES (?1, ?2, 0, ?3)",
            params![source, text, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert many unsent replies in a single transaction.
    pub fn add_replies<I, S>(&self, source: Option<&str>, texts: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        let created_at = chrono::Utc::now().to_rfc3339();
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries (source, text, sent, created_at) VALUES (?1, ?2, 0, ?3)",
            )?;
            for text in texts {
                stmt.execute(params![source, text.as_ref(), created_at])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    /// Look up a row by id.
    pub fn get(&self, id: i64) -> Result<Option<CannedReply>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT id, source, text, sent FROM entries WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(CannedReply {
                id: row.get(0)?,
                source: row.get(1)?,
                text: row.get(2)?,
                sent: row.get(3)?,
            })),
            None => Ok(None),
        }
    }

    pub fn unsent_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entries WHERE sent = 0", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn total_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
