// common/src/models/session.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use chrono::{DateTime, Utc};

/// Opaque, monotonically assigned session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// IRC server a session is (or will be) connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub encoding: String,
}

impl UpstreamTarget {
    /// `host:port` as matched against the server allowlist
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, if self.tls { " (tls)" } else { "" })
    }
}

/// Read-only snapshot of the session registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub sessions: usize,
    pub distinct_ips: usize,
    pub taken_at: DateTime<Utc>,
}
