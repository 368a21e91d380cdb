use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [realtime]
//                    heartbeat_interval_secs = 15
//
//   env var:         CHAT_REALTIME__HEARTBEAT_INTERVAL_SECS=15   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub realtime: RealtimeFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Token settings (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// HS256 signing secret shared with the request layer.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// Connection lifecycle tunables (lives under `[realtime]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeFileConfig {
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    #[serde(default = "default_close_flush_timeout_ms")]
    pub close_flush_timeout_ms: u64,
}

impl Default for RealtimeFileConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: default_auth_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            send_queue_capacity: default_send_queue_capacity(),
            close_flush_timeout_ms: default_close_flush_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_token_ttl() -> i64 {
    chat_auth::DEFAULT_TOKEN_TTL_SECS
}
fn default_auth_timeout_secs() -> u64 {
    10
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_close_flush_timeout_ms() -> u64 {
    2000
}

/// Build a figment that layers: defaults → config.toml → CHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CHAT_AUTH__JWT_SECRET=...`  →  `auth.jwt_secret = "..."`
///   `CHAT_SERVER__PORT=8080`  →  `server.port = 8080`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CHAT_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Connection lifecycle settings used by the realtime hub.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    /// Window for the first frame to carry a token
    pub auth_timeout: Duration,
    /// Interval between liveness pings
    pub heartbeat_interval: Duration,
    /// Outbound frames buffered per connection before drops
    pub send_queue_capacity: usize,
    /// How long a closing connection may spend flushing its queue
    pub close_flush_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::from_file(&RealtimeFileConfig::default())
    }
}

impl RealtimeConfig {
    pub fn from_file(fc: &RealtimeFileConfig) -> Self {
        Self {
            auth_timeout: Duration::from_secs(fc.auth_timeout_secs.max(1)),
            heartbeat_interval: Duration::from_secs(fc.heartbeat_interval_secs.max(1)),
            send_queue_capacity: fc.send_queue_capacity.max(1),
            close_flush_timeout: Duration::from_millis(fc.close_flush_timeout_ms),
        }
    }
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ChatConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".chat-realtime"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("chat.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
