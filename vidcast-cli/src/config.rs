//! Configuration file support for vidcast CLI tools
//!
//! Every field has a default, so a file only needs the values it changes.
//! Durations are given in milliseconds.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vidcast::protocol::{ReorderConfig, SessionConfig, MAX_PAYLOAD_SIZE};
use vidcast::{ReceiverConfig, ServerConfig, ServerMode, DEFAULT_MULTICAST_GROUP, DEFAULT_PORT};

/// Delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Clients register and get bracketed streams
    Session,
    /// Fixed destinations, no handshake
    Broadcast,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Local bind address
    pub bind: SocketAddr,
    /// Directory holding the videos to stream
    pub video_dir: PathBuf,
    pub mode: StreamMode,
    /// Destinations in broadcast mode
    pub broadcast_to: Vec<SocketAddr>,
    pub multicast_ttl: u32,
    /// Payload bytes per packet
    pub chunk_size: usize,
    /// Used when a file's bitrate cannot be probed
    pub default_bitrate_bps: u64,
    /// Pause between two videos
    pub inter_stream_gap_ms: u64,
    /// Start over after the last video
    pub loop_playlist: bool,
    /// Consecutive send failures before a client is dropped (0 keeps it)
    pub evict_after_failures: u32,
    pub max_clients: usize,
    pub poll_interval_ms: u64,
    /// Socket send buffer in bytes (0 keeps the system default)
    pub send_buffer_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            video_dir: PathBuf::from("videos"),
            mode: StreamMode::Session,
            broadcast_to: vec![DEFAULT_MULTICAST_GROUP],
            multicast_ttl: 1,
            chunk_size: MAX_PAYLOAD_SIZE,
            default_bitrate_bps: 2_000_000,
            inter_stream_gap_ms: 3000,
            loop_playlist: true,
            evict_after_failures: 3,
            max_clients: 64,
            poll_interval_ms: 100,
            send_buffer_bytes: 0,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Server to register with (session mode)
    pub server: SocketAddr,
    /// Local bind address
    pub bind: SocketAddr,
    pub mode: StreamMode,
    /// Group to join in broadcast mode
    pub multicast_group: Option<Ipv4Addr>,
    /// "player", "-" for stdout, or a file path
    pub output: String,
    /// Player command line; the stream is written to its stdin
    pub player_command: Vec<String>,
    pub idle_timeout_ms: u64,
    pub registration_retry_ms: u64,
    pub registration_attempts: u32,
    pub deregister_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Widest sequence span held in the reorder buffer
    pub max_reorder_span: u32,
    /// Progress log interval (0 disables)
    pub stats_interval_secs: u64,
    /// Socket receive buffer in bytes (0 keeps the system default)
    pub recv_buffer_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            server: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            mode: StreamMode::Session,
            multicast_group: None,
            output: "player".to_string(),
            player_command: vec!["vlc".to_string(), "fd://0".to_string()],
            idle_timeout_ms: 3000,
            registration_retry_ms: 1000,
            registration_attempts: 5,
            deregister_timeout_ms: 1000,
            poll_interval_ms: 100,
            max_reorder_span: 1024,
            stats_interval_secs: 5,
            recv_buffer_bytes: 1024 * 1024,
        }
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub client: ClientSettings,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example configuration: every default spelled out, plus a multicast
    /// group for the client
    pub fn example() -> Self {
        Config {
            server: ServerSettings::default(),
            client: ClientSettings {
                multicast_group: Some(Ipv4Addr::new(224, 0, 0, 1)),
                ..ClientSettings::default()
            },
        }
    }
}

impl ServerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be between 1 and {}",
                MAX_PAYLOAD_SIZE
            )));
        }
        if self.default_bitrate_bps == 0 {
            return Err(ConfigError::Invalid(
                "default_bitrate_bps must be positive".to_string(),
            ));
        }
        if self.mode == StreamMode::Broadcast && self.broadcast_to.is_empty() {
            return Err(ConfigError::Invalid(
                "broadcast mode needs at least one destination".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine configuration for these settings
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        self.validate()?;
        let mode = match self.mode {
            StreamMode::Session => ServerMode::Session,
            StreamMode::Broadcast => ServerMode::Broadcast {
                destinations: self.broadcast_to.clone(),
            },
        };
        Ok(ServerConfig {
            bind: self.bind,
            mode,
            chunk_size: self.chunk_size,
            evict_after_failures: self.evict_after_failures,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_clients: self.max_clients,
            multicast_ttl: self.multicast_ttl,
            send_buffer_size: (self.send_buffer_bytes > 0).then_some(self.send_buffer_bytes),
        })
    }

    pub fn inter_stream_gap(&self) -> Duration {
        Duration::from_millis(self.inter_stream_gap_ms)
    }
}

impl ClientSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_ms must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.mode == StreamMode::Session && self.registration_attempts == 0 {
            return Err(ConfigError::Invalid(
                "registration_attempts must be at least 1".to_string(),
            ));
        }
        if self.output == "player" && self.player_command.is_empty() {
            return Err(ConfigError::Invalid("player_command is empty".to_string()));
        }
        Ok(())
    }

    /// Engine configuration for these settings
    pub fn receiver_config(&self) -> Result<ReceiverConfig, ConfigError> {
        self.validate()?;
        let mut config = match self.mode {
            StreamMode::Session => ReceiverConfig::session(self.server),
            StreamMode::Broadcast => ReceiverConfig::broadcast(),
        };
        config.idle_timeout = Duration::from_millis(self.idle_timeout_ms);
        config.registration_retry = Duration::from_millis(self.registration_retry_ms);
        config.deregister_timeout = Duration::from_millis(self.deregister_timeout_ms);
        config.poll_interval = Duration::from_millis(self.poll_interval_ms);
        config.stats_interval = self.stats_interval();
        config.session = SessionConfig {
            max_registration_attempts: self.registration_attempts,
            reorder: ReorderConfig {
                max_span: self.max_reorder_span,
                ..config.session.reorder
            },
            ..config.session
        };
        Ok(config)
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
