//! Message entity and repository trait.
//!
//! Maps to the `messages` table in the database schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Message kinds stored in the `message_type` column.
///
/// Only `text` is produced by the live chat path; the other kinds come from
/// history written by other writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A regular user message
    #[default]
    Text,
    /// An image reference
    Image,
    /// A system notice
    System,
}

impl MessageType {
    /// Convert from database string representation.
    pub fn from_db(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" => Self::Image,
            "system" => Self::System,
            _ => Self::Text,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message stored in a chat room.
///
/// Maps to the `messages` table:
/// - id: BIGSERIAL PRIMARY KEY
/// - chat_id: BIGINT NOT NULL
/// - sender_id: TEXT NOT NULL
/// - content: TEXT NOT NULL
/// - message_type: TEXT NOT NULL DEFAULT 'text'
/// - sent_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned ID
    pub id: i64,

    /// Room the message belongs to
    pub chat_id: i64,

    /// Identity of the author, as asserted by the server
    pub sender_id: String,

    pub content: String,

    pub message_type: MessageType,

    /// Store-assigned send time
    pub sent_at: DateTime<Utc>,
}

/// A message accepted by the hub and not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: i64,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
}

impl NewMessage {
    /// Build a text message bound to a connection's identity.
    pub fn text(chat_id: i64, sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id: sender_id.into(),
            content: content.into(),
            message_type: MessageType::Text,
        }
    }
}

/// Persistence port used by the hub and the connection bootstrap.
///
/// Implementations must return history ordered by `sent_at` ascending.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Durably store a message, assigning its ID and send time.
    async fn save_message(&self, message: NewMessage) -> Result<Message, AppError>;

    /// Load the most recent `limit` messages of a room, oldest first.
    async fn load_history(&self, chat_id: i64, limit: i64) -> Result<Vec<Message>, AppError>;

    /// Cheap reachability check for readiness probes.
    async fn ping(&self) -> Result<(), AppError>;
}
