// common/src/config.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use config::{Config as ConfigFile, File, Environment};

use crate::crypto::PayloadCipher;

/// Errors raised while loading or validating the gateway configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Central configuration for the gateway
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub upstream: UpstreamConfig,
    pub irc: IrcDefaults,
    pub webirc: WebircConfig,
    pub encryption: EncryptionConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener and admission settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// The only path that accepts WebSocket upgrades
    pub path: String,
    /// Honour `X-Forwarded-For` when resolving the client address
    pub trust_proxy: bool,
    /// Origin patterns, each may contain one `*`. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_clients: usize,
    pub max_connections_per_ip: usize,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_messages: u32,
}

/// Where sessions may connect to and how upstream sockets are supervised
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `host:port` entries. Empty allows any target.
    pub allowed_servers: Vec<String>,
    pub block_private_hosts: bool,
    pub default_host: Option<String>,
    pub default_port: Option<u16>,
    pub default_tls: bool,
    pub connect_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub quit_linger_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IrcDefaults {
    pub default_username: String,
    pub default_realname: String,
    pub default_quit_message: String,
    pub default_encoding: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebircConfig {
    pub enabled: bool,
    pub password: String,
    pub gateway_name: String,
    pub hostname_suffix: String,
    /// Permit sending the WEBIRC password over a non-TLS upstream
    pub allow_plaintext: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    /// Base64 encoded 32 byte key
    pub key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7778,
            path: "/webirc".to_string(),
            trust_proxy: false,
            allowed_origins: Vec::new(),
            heartbeat_interval_secs: 15,
            client_timeout_secs: 60,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients: 1000,
            max_connections_per_ip: 5,
            rate_limit_window_ms: 1000,
            rate_limit_max_messages: 50,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            allowed_servers: Vec::new(),
            block_private_hosts: true,
            default_host: None,
            default_port: None,
            default_tls: false,
            connect_timeout_secs: 30,
            ping_interval_secs: 30,
            ping_timeout_secs: 90,
            quit_linger_secs: 5,
        }
    }
}

impl Default for IrcDefaults {
    fn default() -> Self {
        Self {
            default_username: "webchat".to_string(),
            default_realname: "Web IRC user".to_string(),
            default_quit_message: "Web client disconnected".to_string(),
            default_encoding: "utf8".to_string(),
        }
    }
}

impl Default for WebircConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            password: String::new(),
            gateway_name: "webgateway".to_string(),
            hostname_suffix: ".web".to_string(),
            allow_plaintext: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

impl LimitsConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

impl UpstreamConfig {
    /// Port used when a target names a host but no port
    pub fn port_for(&self, tls: bool) -> u16 {
        match self.default_port {
            Some(port) => port,
            None if tls => 6697,
            None => 6667,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn quit_linger(&self) -> Duration {
        Duration::from_secs(self.quit_linger_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, ConfigError> {
        // Get the run mode, defaulting to "development"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let config = ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // GATEWAY__SERVER__PORT=8080, GATEWAY__SERVER__ALLOWED_ORIGINS=a,b
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .with_list_parse_key("upstream.allowed_servers"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load from files and environment, falling back to built-in defaults
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            },
            Err(e) => {
                tracing::warn!("Failed to load configuration: {}", e);
                tracing::info!("Falling back to built-in defaults");
                Self::default()
            }
        }
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.path must start with '/', got {:?}",
                self.server.path
            )));
        }
        if self.limits.max_clients == 0 || self.limits.max_connections_per_ip == 0 {
            return Err(ConfigError::Invalid("connection limits must be non-zero".into()));
        }
        if self.limits.rate_limit_window_ms == 0 || self.limits.rate_limit_max_messages == 0 {
            return Err(ConfigError::Invalid("rate limit window and budget must be non-zero".into()));
        }
        if self.webirc.enabled && self.webirc.password.is_empty() {
            return Err(ConfigError::Invalid("webirc.enabled requires webirc.password".into()));
        }
        if self.encryption.enabled {
            PayloadCipher::from_config(&self.encryption)
                .map_err(|e| ConfigError::Invalid(format!("encryption.key: {}", e)))?;
        }
        Ok(())
    }
}
