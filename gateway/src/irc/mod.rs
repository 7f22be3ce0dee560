// gateway/src/irc/mod.rs
pub mod codec;
pub mod protocol;
pub mod tls;
pub mod transport;

use std::time::Duration;

use common::{UpstreamConfig, UpstreamTarget};

/// Identity sent during WEBIRC spoofing, already resolved for this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebircParams {
    pub password: String,
    pub gateway_name: String,
    pub hostname: String,
    pub ip: String,
}

/// Everything needed to open and register one upstream connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub target: UpstreamTarget,
    pub nick: String,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
    pub webirc: Option<WebircParams>,
    /// Refuse the connection if the host resolves to a private address
    pub block_private_hosts: bool,
}

/// Timers that supervise an upstream socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamTimeouts {
    pub connect: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub quit_linger: Duration,
}

impl From<&UpstreamConfig> for UpstreamTimeouts {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            ping_interval: config.ping_interval(),
            ping_timeout: config.ping_timeout(),
            quit_linger: config.quit_linger(),
        }
    }
}
