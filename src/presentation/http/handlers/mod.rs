//! HTTP Handlers
//!
//! Operational endpoints; chat traffic itself goes over the WebSocket.

pub mod health;
