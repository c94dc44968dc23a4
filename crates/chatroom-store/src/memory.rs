use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use chatroom_core::Message;

use crate::error::StoreError;
use crate::MessageStore;

/// Volatile history, for tests and for running without a database file.
///
/// Can be switched into a failing mode where every operation errors, which
/// lets callers exercise their fail-open paths.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of everything stored so far, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

impl MessageStore for MemoryStore {
    fn init(&self) -> Result<(), StoreError> {
        if self.is_failing() {
            return Err(StoreError::Init("memory store set to fail".into()));
        }
        Ok(())
    }

    fn append(&self, message: &Message) -> Result<(), StoreError> {
        if self.is_failing() {
            return Err(StoreError::Persist("memory store set to fail".into()));
        }
        if message.kind().is_persistable() {
            self.messages.lock().push(message.clone());
        }
        Ok(())
    }

    fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        if self.is_failing() {
            return Err(StoreError::Query("memory store set to fail".into()));
        }
        let messages = self.messages.lock();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}
