//! WebSocket Message Codec
//!
//! Client to server frames carry only `{ "content": string }`. Room and
//! sender are never read from the payload; the hub binds them from the
//! connection's identity.
//!
//! Server to client frames are the stored [`Message`] record:
//! `{ "id", "chat_id", "sender_id", "content", "message_type", "sent_at" }`.

use axum::extract::ws::Utf8Bytes;
use serde::Deserialize;

use crate::domain::Message;

/// Inbound chat frame
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("message content is empty")]
    EmptyContent,

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decode a client frame. Extra fields are ignored.
pub fn decode_inbound(raw: &[u8]) -> Result<InboundMessage, CodecError> {
    let inbound: InboundMessage = serde_json::from_slice(raw).map_err(CodecError::Malformed)?;
    if inbound.content.trim().is_empty() {
        return Err(CodecError::EmptyContent);
    }
    Ok(inbound)
}

/// Encode a stored message as an outbound text frame.
pub fn encode_message(message: &Message) -> Result<Utf8Bytes, CodecError> {
    serde_json::to_string(message)
        .map(Utf8Bytes::from)
        .map_err(CodecError::Encode)
}
