use std::path::Path;

use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use chatroom_core::{Message, MessageKind};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::MessageStore;

const TABLE: &str = "messages";

/// Chat history in SQLite. Rows are returned in insertion order, which is
/// the order the hub accepted them.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: Database,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Number of stored messages.
    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
    }
}

impl MessageStore for SqliteMessageStore {
    #[instrument(skip(self), fields(path = %self.db.path().display()))]
    fn init(&self) -> Result<(), StoreError> {
        self.db.migrate()?;
        info!("message store initialized");
        Ok(())
    }

    #[instrument(skip(self, message), fields(kind = %message.kind()))]
    fn append(&self, message: &Message) -> Result<(), StoreError> {
        let (Some(username), Some(content), Some(timestamp)) =
            (message.username(), message.content(), message.timestamp())
        else {
            return Ok(());
        };
        if !message.kind().is_persistable() {
            return Ok(());
        }

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (type, username, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    message.kind().as_str(),
                    username,
                    content,
                    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ],
            )
            .map_err(|e| StoreError::Persist(e.to_string()))?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT type, username, content, timestamp FROM messages
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut newest_first = Vec::new();
            while let Some(row) = rows.next()? {
                if let Some(message) = row_to_message(row)? {
                    newest_first.push(message);
                }
            }
            newest_first.reverse();
            Ok(newest_first)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Option<Message>, StoreError> {
    let raw_kind: String = row_helpers::get(row, 0, TABLE, "type")?;
    let kind: MessageKind = row_helpers::parse_enum(&raw_kind, TABLE, "type")?;
    let username = row_helpers::get_text_or_empty(row, 1, TABLE, "username")?;
    let content = row_helpers::get_text_or_empty(row, 2, TABLE, "content")?;
    let raw_ts: String = row_helpers::get(row, 3, TABLE, "timestamp")?;

    let timestamp = row_helpers::parse_timestamp(&raw_ts).unwrap_or_else(|| {
        warn!(timestamp = %raw_ts, "unparseable timestamp in history, using now");
        Utc::now()
    });

    Ok(Message::from_record(kind, username, content, timestamp))
}
