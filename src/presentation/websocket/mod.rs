//! WebSocket Chat
//!
//! Real-time room fan-out: the hub, per-connection clients, the wire codec
//! and the upgrade/bootstrap handler.

pub mod client;
pub mod codec;
pub mod handler;
pub mod hub;

pub use client::{Client, ClientHandle, ClientId, ClientSession, Outbound};
pub use codec::{decode_inbound, encode_message, CodecError, InboundMessage};
pub use handler::{bootstrap, replay_history, ws_handler, BootstrapContext, ReplayOutcome};
pub use hub::{Hub, HubError, HubHandle, HubSnapshot, Inbound};
