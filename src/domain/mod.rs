//! # Domain Layer
//!
//! Chat messages and the persistence port the real-time core depends on.
//! Nothing here knows about sockets, the hub, or a particular database.

pub mod entities;

// Re-export commonly used types
pub use entities::*;
