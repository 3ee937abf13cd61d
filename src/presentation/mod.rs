//! Presentation Layer
//!
//! HTTP routes, middleware and the WebSocket chat surface.

pub mod http;
pub mod middleware;
pub mod websocket;
