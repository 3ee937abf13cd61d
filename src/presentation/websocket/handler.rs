//! WebSocket Connection Handler
//!
//! Upgrades an authenticated request, starts a [`Client`] bound to the
//! caller's identity and the requested room, then replays stored history
//! into the new client's outbound queue in the background.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    response::Response,
    Extension,
};
use tokio::sync::mpsc::error::SendTimeoutError;

use super::client::{Client, ClientSession, Outbound};
use super::codec;
use super::hub::HubHandle;
use crate::config::WebSocketSettings;
use crate::domain::MessageRepository;
use crate::presentation::middleware::AuthUser;
use crate::startup::AppState;

/// Everything a new connection needs from the application.
#[derive(Clone)]
pub struct BootstrapContext {
    pub hub: HubHandle,
    pub repository: Arc<dyn MessageRepository>,
    pub settings: WebSocketSettings,
}

impl BootstrapContext {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            hub: state.hub.clone(),
            repository: state.messages.clone(),
            settings: state.settings.websocket.clone(),
        }
    }
}

/// Result of one history replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub delivered: usize,
    pub skipped: usize,
}

/// WebSocket upgrade handler for `GET /ws/chats/{chat_id}`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    let ctx = BootstrapContext::from_state(&state);
    let max_size = ctx.settings.max_message_size;

    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| bootstrap(socket, ctx, chat_id, user.user_id))
}

/// Start a client on an upgraded socket and kick off history replay.
pub async fn bootstrap(socket: WebSocket, ctx: BootstrapContext, chat_id: i64, user_id: String) {
    let client = Client::new(ctx.hub.clone(), socket, user_id.clone(), chat_id, &ctx.settings);

    let session = match client.start().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(user_id = %user_id, chat_id = chat_id, error = %e, "Failed to register client");
            return;
        }
    };

    tracing::debug!(
        client_id = %session.id,
        user_id = %session.user_id,
        chat_id = chat_id,
        "Client started"
    );

    tokio::spawn(replay_history(
        ctx.repository,
        session,
        ctx.settings.history_limit,
        ctx.settings.history_grace(),
    ));
}

/// Enqueue a room's stored messages, oldest first, for one client.
///
/// Best effort: a message that cannot be queued within `grace` is skipped,
/// and replay stops as soon as the client is gone. Live messages may
/// interleave; the client's writer drops any id it has already sent until
/// `ReplayComplete` arrives.
pub async fn replay_history(
    repository: Arc<dyn MessageRepository>,
    session: ClientSession,
    limit: i64,
    grace: Duration,
) -> ReplayOutcome {
    let mut outcome = ReplayOutcome::default();

    let history = match repository.load_history(session.chat_id, limit).await {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(
                client_id = %session.id,
                chat_id = session.chat_id,
                error = %e,
                "Failed to load chat history"
            );
            Vec::new()
        }
    };

    for message in history {
        let Some(outbound) = session.outbound().upgrade() else {
            tracing::debug!(client_id = %session.id, "Client gone, stopping history replay");
            return outcome;
        };

        let frame = match codec::encode_message(&message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(message_id = message.id, error = %e, "Skipping unencodable message");
                outcome.skipped += 1;
                continue;
            }
        };

        let item = Outbound::Message {
            id: message.id,
            frame,
        };
        match outbound.send_timeout(item, grace).await {
            Ok(()) => outcome.delivered += 1,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::debug!(
                    client_id = %session.id,
                    message_id = message.id,
                    "Outbound queue busy, skipping history message"
                );
                outcome.skipped += 1;
            }
            Err(SendTimeoutError::Closed(_)) => return outcome,
        }
    }

    if let Some(outbound) = session.outbound().upgrade() {
        if outbound
            .send_timeout(Outbound::ReplayComplete, grace)
            .await
            .is_err()
        {
            tracing::debug!(client_id = %session.id, "Could not signal end of history replay");
        }
    }

    tracing::info!(
        client_id = %session.id,
        chat_id = session.chat_id,
        delivered = outcome.delivered,
        skipped = outcome.skipped,
        "History replay finished"
    );

    outcome
}
