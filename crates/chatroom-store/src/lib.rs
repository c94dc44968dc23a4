//! Chat history persistence.
//!
//! The hub talks to storage only through [`MessageStore`]. Implementations
//! are synchronous; they are called from the hub task and are expected to
//! be quick (a single local SQLite write or read).

pub mod database;
pub mod error;
pub mod memory;
pub mod messages;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use messages::SqliteMessageStore;

use chatroom_core::Message;

/// Durable record of chat, join and leave messages.
pub trait MessageStore: Send + Sync {
    /// Prepare storage. Safe to call more than once.
    fn init(&self) -> Result<(), StoreError>;

    /// Record one message. Kinds that are not history (`user_list`,
    /// `error`) are accepted and ignored.
    fn append(&self, message: &Message) -> Result<(), StoreError>;

    /// The newest `limit` records, returned oldest first.
    fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError>;
}
