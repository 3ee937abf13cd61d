//! Chat Hub
//!
//! The hub is the only owner of room membership. Registration,
//! unregistration and broadcast all arrive as commands on bounded channels
//! and are applied one at a time by [`Hub::run`], so the membership index
//! needs no lock.
//!
//! Broadcast order within a room is the order in which the hub dequeued the
//! inbound messages. A member whose outbound queue is full is evicted on the
//! spot instead of stalling the loop.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::client::{ClientHandle, ClientId, Outbound};
use super::codec;
use crate::config::HubSettings;
use crate::domain::{MessageRepository, NewMessage};
use crate::infrastructure::metrics;

/// A decoded chat message from a connected client.
///
/// Carries no room or author: the hub takes both from the sender's
/// registration.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub client_id: ClientId,
    pub content: String,
}

/// Point-in-time view of hub membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    pub clients: usize,
    /// Member count per room; only rooms with members appear
    pub rooms: BTreeMap<i64, usize>,
}

impl HubSnapshot {
    pub fn members(&self, chat_id: i64) -> usize {
        self.rooms.get(&chat_id).copied().unwrap_or(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
}

/// Cloneable front end to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<ClientId>,
    inbound_tx: mpsc::Sender<Inbound>,
    query_tx: mpsc::Sender<oneshot::Sender<HubSnapshot>>,
    shutdown: CancellationToken,
}

impl HubHandle {
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubError> {
        self.register_tx
            .send(client)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Remove a client. Unknown or already removed clients are ignored.
    pub async fn unregister(&self, client_id: ClientId) -> Result<(), HubError> {
        self.unregister_tx
            .send(client_id)
            .await
            .map_err(|_| HubError::Closed)
    }

    pub async fn broadcast(&self, message: Inbound) -> Result<(), HubError> {
        self.inbound_tx
            .send(message)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Ask the hub loop for its current membership.
    ///
    /// Answered after every command enqueued before it.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query_tx
            .send(reply_tx)
            .await
            .map_err(|_| HubError::Closed)?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }

    /// Stop the hub; every registered client's queue is closed.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.register_tx.is_closed()
    }
}

/// Room membership registry and broadcaster.
pub struct Hub {
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<ClientId>,
    inbound_rx: mpsc::Receiver<Inbound>,
    query_rx: mpsc::Receiver<oneshot::Sender<HubSnapshot>>,
    shutdown: CancellationToken,

    repository: Arc<dyn MessageRepository>,
    save_timeout: Duration,

    clients: HashMap<ClientId, ClientHandle>,
    rooms: HashMap<i64, HashSet<ClientId>>,
}

impl Hub {
    pub fn new(repository: Arc<dyn MessageRepository>, settings: &HubSettings) -> (Self, HubHandle) {
        let capacity = settings.channel_capacity;
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (query_tx, query_rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();

        let hub = Self {
            register_rx,
            unregister_rx,
            inbound_rx,
            query_rx,
            shutdown: shutdown.clone(),
            repository,
            save_timeout: settings.save_timeout(),
            clients: HashMap::new(),
            rooms: HashMap::new(),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            inbound_tx,
            query_tx,
            shutdown,
        };

        (hub, handle)
    }

    /// Create a hub and run it on its own task.
    pub fn spawn(
        repository: Arc<dyn MessageRepository>,
        settings: &HubSettings,
    ) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(repository, settings);
        (handle, tokio::spawn(hub.run()))
    }

    /// Control loop. Ends on shutdown or once every handle is dropped.
    ///
    /// Branches are polled in priority order, so membership changes that are
    /// already queued are applied before the next broadcast.
    pub async fn run(mut self) {
        tracing::info!("Hub started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                client = self.register_rx.recv() => match client {
                    Some(client) => self.register(client),
                    None => break,
                },

                client_id = self.unregister_rx.recv() => match client_id {
                    Some(client_id) => self.unregister(client_id),
                    None => break,
                },

                inbound = self.inbound_rx.recv() => match inbound {
                    Some(inbound) => self.handle_inbound(inbound).await,
                    None => break,
                },

                reply = self.query_rx.recv() => match reply {
                    Some(reply) => {
                        let _ = reply.send(self.snapshot());
                    }
                    None => break,
                },
            }
        }

        let remaining = self.clients.len();
        // Dropping the handles closes every outbound queue.
        self.clients.clear();
        self.rooms.clear();
        self.publish_membership();

        tracing::info!(closed_clients = remaining, "Hub stopped");
    }

    fn register(&mut self, client: ClientHandle) {
        tracing::info!(
            client_id = %client.id,
            user_id = %client.user_id,
            chat_id = client.chat_id,
            "Client joined chat"
        );

        self.rooms.entry(client.chat_id).or_default().insert(client.id);
        self.clients.insert(client.id, client);
        self.publish_membership();
    }

    fn unregister(&mut self, client_id: ClientId) {
        if let Some(client) = self.remove_client(client_id) {
            tracing::info!(
                client_id = %client.id,
                user_id = %client.user_id,
                chat_id = client.chat_id,
                "Client left chat"
            );
        }
    }

    /// Drop a client from both indices, deleting its room once empty.
    fn remove_client(&mut self, client_id: ClientId) -> Option<ClientHandle> {
        let client = self.clients.remove(&client_id)?;

        if let Some(members) = self.rooms.get_mut(&client.chat_id) {
            members.remove(&client_id);
            if members.is_empty() {
                self.rooms.remove(&client.chat_id);
            }
        }

        self.publish_membership();
        Some(client)
    }

    /// Persist a message, then fan it out to the sender's room.
    ///
    /// Nothing is broadcast unless the store accepted the message.
    async fn handle_inbound(&mut self, inbound: Inbound) {
        let Some(sender) = self.clients.get(&inbound.client_id) else {
            tracing::debug!(
                client_id = %inbound.client_id,
                "Dropping message from unregistered client"
            );
            return;
        };

        let chat_id = sender.chat_id;
        let new_message = NewMessage::text(chat_id, sender.user_id.clone(), inbound.content);

        let saved = match timeout(self.save_timeout, self.repository.save_message(new_message)).await
        {
            Ok(Ok(saved)) => saved,
            Ok(Err(e)) => {
                metrics::PERSISTENCE_FAILURES_TOTAL.inc();
                tracing::warn!(
                    client_id = %inbound.client_id,
                    chat_id = chat_id,
                    error = %e,
                    "Failed to save message, not broadcasting"
                );
                return;
            }
            Err(_) => {
                metrics::PERSISTENCE_FAILURES_TOTAL.inc();
                tracing::warn!(
                    client_id = %inbound.client_id,
                    chat_id = chat_id,
                    timeout_ms = self.save_timeout.as_millis() as u64,
                    "Saving message timed out, not broadcasting"
                );
                return;
            }
        };

        let frame = match codec::encode_message(&saved) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(message_id = saved.id, error = %e, "Failed to encode message");
                return;
            }
        };

        metrics::MESSAGES_BROADCAST_TOTAL.inc();
        self.fan_out(saved.chat_id, saved.id, frame);
    }

    /// Push a frame to every member of a room without waiting on any of them.
    fn fan_out(&mut self, chat_id: i64, message_id: i64, frame: Utf8Bytes) {
        let Some(members) = self.rooms.get(&chat_id) else {
            return;
        };

        let mut evicted = Vec::new();
        for client_id in members {
            let Some(client) = self.clients.get(client_id) else {
                continue;
            };

            let item = Outbound::Message {
                id: message_id,
                frame: frame.clone(),
            };
            match client.outbound.try_send(item) {
                Ok(()) => metrics::FRAMES_DELIVERED_TOTAL.inc(),
                Err(TrySendError::Full(_)) => evicted.push((*client_id, "queue_full")),
                Err(TrySendError::Closed(_)) => evicted.push((*client_id, "queue_closed")),
            }
        }

        for (client_id, reason) in evicted {
            if let Some(client) = self.remove_client(client_id) {
                metrics::record_eviction(reason);
                tracing::warn!(
                    client_id = %client.id,
                    user_id = %client.user_id,
                    chat_id = client.chat_id,
                    reason = reason,
                    "Evicting unresponsive client"
                );
            }
        }

        tracing::debug!(chat_id = chat_id, message_id = message_id, "Message broadcast");
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            clients: self.clients.len(),
            rooms: self
                .rooms
                .iter()
                .map(|(chat_id, members)| (*chat_id, members.len()))
                .collect(),
        }
    }

    fn publish_membership(&self) {
        metrics::set_membership(self.clients.len(), self.rooms.len());
    }
}
