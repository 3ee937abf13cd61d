//! Repository Implementations
//!
//! Implementations of the message persistence port.
//!
//! - **PgMessageRepository** - PostgreSQL-backed store used in production
//! - **InMemoryMessageRepository** - process-local store for development and tests
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chat_hub::domain::MessageRepository;
//! use chat_hub::infrastructure::repositories::PgMessageRepository;
//!
//! let repository: Arc<dyn MessageRepository> = Arc::new(PgMessageRepository::new(pool));
//! ```

pub mod memory_repository;
pub mod message_repository;

pub use memory_repository::InMemoryMessageRepository;
pub use message_repository::PgMessageRepository;
