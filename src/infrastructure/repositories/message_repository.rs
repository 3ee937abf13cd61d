//! Message Repository Implementation
//!
//! PostgreSQL implementation of the message persistence port.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Message, MessageRepository, MessageType, NewMessage};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// PostgreSQL message repository implementation.
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    /// Creates a new PgMessageRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for message queries.
/// Maps to the messages table schema defined in the migration.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    chat_id: i64,
    sender_id: String,
    content: String,
    message_type: String,
    sent_at: DateTime<Utc>,
}

impl MessageRow {
    /// Converts database row to domain Message entity.
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content,
            message_type: MessageType::from_db(&self.message_type),
            sent_at: self.sent_at,
        }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn save_message(&self, message: NewMessage) -> Result<Message, AppError> {
        let start = Instant::now();
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (chat_id, sender_id, content, message_type)
            VALUES ($1, $2, $3, $4)
            RETURNING id, chat_id, sender_id, content, message_type, sent_at
            "#,
        )
        .bind(message.chat_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        metrics::record_db_query("insert", "messages", start.elapsed().as_secs_f64());

        Ok(row.into_message())
    }

    /// Load the newest `limit` messages of a chat, returned oldest first.
    ///
    /// The inner query picks the tail of the room, the outer one restores
    /// ascending send order for replay.
    async fn load_history(&self, chat_id: i64, limit: i64) -> Result<Vec<Message>, AppError> {
        let start = Instant::now();
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, chat_id, sender_id, content, message_type, sent_at
            FROM (
                SELECT id, chat_id, sender_id, content, message_type, sent_at
                FROM messages
                WHERE chat_id = $1
                ORDER BY sent_at DESC, id DESC
                LIMIT $2
            ) AS tail
            ORDER BY sent_at ASC, id ASC
            "#,
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        metrics::record_db_query("select", "messages", start.elapsed().as_secs_f64());

        Ok(rows.into_iter().map(|r| r.into_message()).collect())
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
