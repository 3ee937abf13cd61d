//! # Domain Entities
//!
//! - **Message**: a chat message as stored and as sent to clients
//! - **MessageRepository**: the persistence port, implemented in the
//!   infrastructure layer

mod message;

pub use message::{Message, MessageRepository, MessageType, NewMessage};
