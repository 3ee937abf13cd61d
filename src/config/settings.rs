//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Message store configuration
    pub database: DatabaseSettings,

    /// Upstream authentication settings
    pub auth: AuthSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Per-connection WebSocket limits and timers
    pub websocket: WebSocketSettings,

    /// Hub control loop configuration
    pub hub: HubSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on (0 picks an ephemeral port)
    pub port: u16,
}

/// Which message store backs the persistence port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

/// Message store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackend,

    /// Database connection URL (required for the postgres backend)
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,

    /// Apply bundled migrations on startup
    pub run_migrations: bool,
}

/// JWT validation for the upgrade endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret used to validate bearer tokens
    pub jwt_secret: String,

    /// Development bypass: identity is read from `X-Test-User-ID`
    pub disabled: bool,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum inbound message size in bytes (default: 512)
    pub max_message_size: usize,

    /// Capacity of each client's outbound queue (default: 256)
    pub outbound_queue_capacity: usize,

    /// Time allowed to write a frame to the peer
    pub write_wait_ms: u64,

    /// Time allowed without any inbound frame before the peer is dropped
    pub pong_wait_ms: u64,

    /// Ping period, must be shorter than `pong_wait_ms`
    pub ping_period_ms: u64,

    /// Maximum number of stored messages replayed on join
    pub history_limit: i64,

    /// How long replay waits for queue space before skipping a message
    pub history_grace_ms: u64,
}

/// Hub configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    /// Capacity of each hub control channel
    pub channel_capacity: usize,

    /// Upper bound on a single `save_message` call
    pub save_timeout_ms: u64,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the loaded values are inconsistent (see [`Settings::validate`]).
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.backend", "postgres")?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("database.run_migrations", true)?
            .set_default("auth.jwt_secret", "")?
            .set_default("auth.disabled", false)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .set_default("websocket.max_message_size", 512_i64)?
            .set_default("websocket.outbound_queue_capacity", 256_i64)?
            .set_default("websocket.write_wait_ms", 10_000_i64)?
            .set_default("websocket.pong_wait_ms", 60_000_i64)?
            .set_default("websocket.ping_period_ms", 54_000_i64)?
            .set_default("websocket.history_limit", 100_i64)?
            .set_default("websocket.history_grace_ms", 100_i64)?
            .set_default("hub.channel_capacity", 256_i64)?
            .set_default("hub.save_timeout_ms", 5_000_i64)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=8080 -> server.port = 8080
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("auth.jwt_secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| settings.validate().map(|_| settings))
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.auth.disabled && self.auth.jwt_secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.auth.jwt_secret.len()
            )));
        }

        if self.database.backend == DatabaseBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigError::Message(
                "database.url is required when database.backend = \"postgres\"".into(),
            ));
        }

        let ws = &self.websocket;
        if ws.ping_period_ms == 0 || ws.write_wait_ms == 0 {
            return Err(ConfigError::Message(
                "websocket.ping_period_ms and websocket.write_wait_ms must be greater than zero"
                    .into(),
            ));
        }
        if ws.ping_period_ms >= ws.pong_wait_ms {
            return Err(ConfigError::Message(format!(
                "websocket.ping_period_ms ({}) must be less than websocket.pong_wait_ms ({})",
                ws.ping_period_ms, ws.pong_wait_ms
            )));
        }
        if ws.outbound_queue_capacity == 0 || self.hub.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "queue capacities must be greater than zero".into(),
            ));
        }
        if ws.history_limit < 0 {
            return Err(ConfigError::Message(
                "websocket.history_limit must not be negative".into(),
            ));
        }
        // A full replay must leave queue space for live fan-out, which
        // evicts on a full queue.
        if ws.history_limit as u64 >= ws.outbound_queue_capacity as u64 {
            return Err(ConfigError::Message(format!(
                "websocket.history_limit ({}) must be less than websocket.outbound_queue_capacity ({})",
                ws.history_limit, ws.outbound_queue_capacity
            )));
        }

        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketSettings {
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn history_grace(&self) -> Duration {
        Duration::from_millis(self.history_grace_ms)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_message_size: 512,
            outbound_queue_capacity: 256,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            ping_period_ms: 54_000,
            history_limit: 100,
            history_grace_ms: 100,
        }
    }
}

impl HubSettings {
    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            save_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
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
                jwt_secret: "a".repeat(MIN_JWT_SECRET_LENGTH),
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

    #[test]
    fn test_default_timers_are_consistent() {
        let ws = WebSocketSettings::default();
        assert!(ws.ping_period() < ws.pong_wait());
        assert_eq!(ws.ping_period_ms, ws.pong_wait_ms * 9 / 10);
    }

    #[test]
    fn test_validate_accepts_memory_backend_without_url() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut s = settings();
        s.auth.jwt_secret = "short".into();
        assert!(s.validate().is_err());

        s.auth.disabled = true;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_postgres_without_url() {
        let mut s = settings();
        s.database.backend = DatabaseBackend::Postgres;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ping_not_shorter_than_pong() {
        let mut s = settings();
        s.websocket.ping_period_ms = s.websocket.pong_wait_ms;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ping_period() {
        let mut s = settings();
        s.websocket.ping_period_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_write_wait() {
        let mut s = settings();
        s.websocket.write_wait_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_history_not_below_queue_capacity() {
        let mut s = settings();
        s.websocket.outbound_queue_capacity = 2;
        s.websocket.history_limit = 100;
        assert!(s.validate().is_err());

        s.websocket.history_limit = 2;
        assert!(s.validate().is_err());

        s.websocket.history_limit = 1;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut s = settings();
        s.websocket.outbound_queue_capacity = 0;
        assert!(s.validate().is_err());
    }
}
