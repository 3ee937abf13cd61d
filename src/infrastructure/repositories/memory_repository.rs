//! In-memory message store.
//!
//! Backs `database.backend = "memory"` and the test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::domain::{Message, MessageRepository, NewMessage};
use crate::shared::error::AppError;

#[derive(Default)]
struct Store {
    next_id: i64,
    chats: HashMap<i64, Vec<Message>>,
}

/// Message repository keeping every room's log in process memory.
#[derive(Default)]
pub struct InMemoryMessageRepository {
    store: Mutex<Store>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already-built message, e.g. fixtures written by another writer.
    ///
    /// Keeps each room sorted by send time so replay order holds regardless
    /// of insertion order.
    pub fn seed(&self, message: Message) {
        let mut store = self.store.lock();
        store.next_id = store.next_id.max(message.id);
        let log = store.chats.entry(message.chat_id).or_default();
        let pos = log.partition_point(|m| (m.sent_at, m.id) <= (message.sent_at, message.id));
        log.insert(pos, message);
    }

    /// Number of messages stored for a room.
    pub fn count(&self, chat_id: i64) -> usize {
        self.store
            .lock()
            .chats
            .get(&chat_id)
            .map_or(0, |log| log.len())
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn save_message(&self, message: NewMessage) -> Result<Message, AppError> {
        let mut store = self.store.lock();
        store.next_id += 1;
        let id = store.next_id;
        let log = store.chats.entry(message.chat_id).or_default();

        // Never go backwards relative to the room's newest entry.
        let now = Utc::now();
        let sent_at = log.last().map_or(now, |last| last.sent_at.max(now));

        let saved = Message {
            id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            sent_at,
        };
        log.push(saved.clone());
        Ok(saved)
    }

    async fn load_history(&self, chat_id: i64, limit: i64) -> Result<Vec<Message>, AppError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let store = self.store.lock();
        Ok(store
            .chats
            .get(&chat_id)
            .map(|log| log[log.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
