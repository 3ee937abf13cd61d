//! Common Test Utilities
//!
//! Boots a real server on an ephemeral port with the in-memory store, plus
//! helpers for minting tokens and driving WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

use chat_hub::config::{
    AuthSettings, CorsSettings, DatabaseBackend, DatabaseSettings, HubSettings, ServerSettings,
    Settings, WebSocketSettings,
};
use chat_hub::domain::{Message, MessageRepository, MessageType};
use chat_hub::infrastructure::repositories::InMemoryMessageRepository;
use chat_hub::presentation::http::routes;
use chat_hub::presentation::middleware::auth::Claims;
use chat_hub::presentation::websocket::HubHandle;
use chat_hub::startup::{AppState, Application};

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// How long a test waits for something it expects to happen
pub const WAIT: Duration = Duration::from_secs(5);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for a test server: ephemeral port, memory store, real auth.
pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseSettings {
            backend: DatabaseBackend::Memory,
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: 1,
            run_migrations: false,
        },
        auth: AuthSettings {
            jwt_secret: TEST_SECRET.into(),
            disabled: false,
        },
        cors: CorsSettings {
            allowed_origins: vec![],
        },
        websocket: WebSocketSettings::default(),
        hub: HubSettings::default(),
        environment: "test".into(),
    }
}

/// A running server and the pieces tests poke at directly
pub struct TestApp {
    pub addr: SocketAddr,
    pub hub: HubHandle,
    pub store: Arc<InMemoryMessageRepository>,
    pub router: Router,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_settings(), Arc::new(InMemoryMessageRepository::new())).await
    }

    pub async fn spawn_with(settings: Settings, store: Arc<InMemoryMessageRepository>) -> Self {
        let messages: Arc<dyn MessageRepository> = store.clone();
        let app = Application::build_with_repository(settings.clone(), messages.clone())
            .await
            .expect("failed to build application");

        let addr = app.local_addr().expect("no local address");
        let hub = app.hub();

        // Router over the same hub, for oneshot HTTP requests
        let router = routes::create_router(AppState {
            hub: hub.clone(),
            messages,
            settings: Arc::new(settings),
        });

        tokio::spawn(app.run_with_shutdown(std::future::pending()));

        Self {
            addr,
            hub,
            store,
            router,
        }
    }

    pub fn ws_url(&self, chat_id: i64, token: &str) -> String {
        format!(
            "ws://{}/ws/chats/{}?access_token={}",
            self.addr, chat_id, token
        )
    }

    /// Connect as `user_id` to a room.
    pub async fn connect(&self, chat_id: i64, user_id: &str) -> WsClient {
        let (ws, _) = connect_async(self.ws_url(chat_id, &mint_token(user_id)))
            .await
            .expect("WebSocket handshake failed");
        ws
    }

    /// Block until the room has exactly `expected` members.
    pub async fn wait_for_members(&self, chat_id: i64, expected: usize) {
        let deadline = Instant::now() + WAIT;
        loop {
            let snapshot = self.hub.snapshot().await.expect("hub stopped");
            if snapshot.members(chat_id) == expected {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "room {} has {} members, expected {}",
                chat_id,
                snapshot.members(chat_id),
                expected
            );
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Make a GET request to the application
    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

/// Sign a token the server will accept for `user_id`.
pub fn mint_token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.into(),
        exp: Utc::now().timestamp() + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Send a chat message frame.
pub async fn send_text(ws: &mut WsClient, content: &str) {
    let frame = serde_json::json!({ "content": content }).to_string();
    ws.send(WsMessage::text(frame)).await.unwrap();
}

/// Next chat message, skipping control frames.
pub async fn next_message(ws: &mut WsClient) -> Message {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str::<Message>(text.as_str())
                        .expect("server sent an undecodable frame");
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                other => panic!("expected a chat message, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

/// Assert no chat message arrives within `window`.
pub async fn assert_silent(ws: &mut WsClient, window: Duration) {
    if let Ok(frame) = timeout(window, ws.next()).await {
        match frame {
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
            other => panic!("expected silence, got {:?}", other),
        }
    }
}

/// A stored message, for seeding history.
pub fn stored(id: i64, chat_id: i64, sender_id: &str, content: &str, age_secs: i64) -> Message {
    Message {
        id,
        chat_id,
        sender_id: sender_id.into(),
        content: content.into(),
        message_type: MessageType::Text,
        sent_at: Utc::now() - chrono::Duration::seconds(age_secs),
    }
}
