//! # Chat Hub Library
//!
//! Real-time room chat over WebSockets:
//! - A single hub task owns room membership and fans messages out
//! - Each message is persisted before it is broadcast
//! - New connections receive the room's recent history, oldest first
//! - PostgreSQL (or an in-memory store) behind a repository trait
//!
//! ## Module Structure
//!
//! ```text
//! chat_hub/
//! +-- config/         Configuration management
//! +-- domain/         Message entity and the persistence port
//! +-- infrastructure/ Database pool, repositories, metrics
//! +-- presentation/   HTTP routes, middleware, WebSocket hub and clients
//! +-- shared/         Common error type
//! ```

// Configuration module
pub mod config;

// Domain layer - Core entities and ports
pub mod domain;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
