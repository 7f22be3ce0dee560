// gateway/src/admission.rs
//! Checks applied to a WebSocket upgrade before a session exists, plus the
//! upstream target rules that are re-applied on every `connect` command.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use actix_web::web;
use serde::Deserialize;

use common::{GatewayConfig, UpstreamTarget};

use crate::error::AdmissionError;

/// One configured origin. A single `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPattern {
    prefix: String,
    suffix: Option<String>,
}

impl OriginPattern {
    pub fn compile(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.split_once('*') {
            Some((prefix, suffix)) => Self {
                prefix: prefix.to_string(),
                suffix: Some(suffix.to_string()),
            },
            None => Self { prefix: pattern, suffix: None },
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        let origin = origin.to_ascii_lowercase();
        match &self.suffix {
            None => origin == self.prefix,
            Some(suffix) => {
                origin.len() >= self.prefix.len() + suffix.len()
                    && origin.starts_with(&self.prefix)
                    && origin.ends_with(suffix.as_str())
            }
        }
    }
}

/// Optional upstream target pinned by the upgrade query string
#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<bool>,
    pub encoding: Option<String>,
}

/// Origin, client address and upstream target rules built once from config
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    origins: Vec<OriginPattern>,
    allowed_servers: Vec<String>,
    block_private_hosts: bool,
    trust_proxy: bool,
    default_tls: bool,
    default_encoding: String,
    default_port_plain: u16,
    default_port_tls: u16,
}

impl AdmissionPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            origins: config.server.allowed_origins.iter().map(|p| OriginPattern::compile(p)).collect(),
            allowed_servers: config
                .upstream
                .allowed_servers
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .collect(),
            block_private_hosts: config.upstream.block_private_hosts,
            trust_proxy: config.server.trust_proxy,
            default_tls: config.upstream.default_tls,
            default_encoding: config.irc.default_encoding.clone(),
            default_port_plain: config.upstream.port_for(false),
            default_port_tls: config.upstream.port_for(true),
        }
    }

    /// An empty allowlist admits any origin, including a missing header
    pub fn check_origin(&self, origin: Option<&str>) -> Result<(), AdmissionError> {
        if self.origins.is_empty() {
            return Ok(());
        }
        match origin {
            Some(origin) if self.origins.iter().any(|p| p.matches(origin)) => Ok(()),
            _ => Err(AdmissionError::OriginNotAllowed),
        }
    }

    /// Client address: first `X-Forwarded-For` entry when proxies are trusted,
    /// otherwise the socket peer. IPv4-mapped IPv6 is reduced to IPv4.
    pub fn client_ip(&self, forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Option<IpAddr> {
        if self.trust_proxy {
            let forwarded = forwarded_for
                .and_then(|header| header.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return Some(ip.to_canonical());
            }
        }
        peer.map(|ip| ip.to_canonical())
    }

    /// Allowlist first, then the private address guard
    pub fn check_target(&self, host: &str, port: u16) -> Result<(), AdmissionError> {
        if !self.allowed_servers.is_empty() {
            let authority = format!("{}:{}", host.trim(), port).to_ascii_lowercase();
            if !self.allowed_servers.iter().any(|allowed| *allowed == authority) {
                return Err(AdmissionError::TargetNotAllowed);
            }
        }
        if self.block_private_hosts && is_private_host(host) {
            return Err(AdmissionError::PrivateTarget);
        }
        Ok(())
    }

    /// Parse and vet `?host=..&port=..&tls=..` from the upgrade request
    pub fn target_from_query(&self, query: &str) -> Result<Option<UpstreamTarget>, AdmissionError> {
        if query.is_empty() {
            return Ok(None);
        }
        let query = web::Query::<TargetQuery>::from_query(query)
            .map_err(|e| AdmissionError::BadRequest(e.to_string()))?
            .into_inner();

        let Some(host) = query.host.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()) else {
            if query.port.is_some() || query.tls.is_some() {
                return Err(AdmissionError::BadRequest("target query requires a host".into()));
            }
            return Ok(None);
        };

        let tls = query.tls.unwrap_or(self.default_tls);
        let port = match query.port {
            Some(0) => return Err(AdmissionError::BadRequest("port must be non-zero".into())),
            Some(port) => port,
            None if tls => self.default_port_tls,
            None => self.default_port_plain,
        };
        self.check_target(&host, port)?;

        Ok(Some(UpstreamTarget {
            host,
            port,
            tls,
            encoding: query.encoding.unwrap_or_else(|| self.default_encoding.clone()),
        }))
    }
}

/// `localhost` or a literal address in a loopback, private, link-local or
/// otherwise non-routable range. Names are not resolved here; the resolved
/// addresses are checked again when the socket is opened.
///
/// Numeric hosts the system resolver would accept but `Ipv4Addr` does not
/// (`127.1`, `2130706433`, `0x7f000001`, `017700000001`) are treated as private.
pub fn is_private_host(host: &str) -> bool {
    let host = host.trim().trim_end_matches('.');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let literal = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    match literal.parse::<IpAddr>() {
        Ok(ip) => is_private_ip(ip),
        Err(_) => is_numeric_host(literal),
    }
}

/// Every label starts with a digit, so a resolver may read it as an IPv4 number
fn is_numeric_host(host: &str) -> bool {
    host.split('.').all(|label| {
        label.starts_with(|c: char| c.is_ascii_digit())
            && label.chars().all(|c| c.is_ascii_hexdigit() || c == 'x' || c == 'X')
    })
}

pub(crate) fn is_private_ip(ip: IpAddr) -> bool {
    let ip = ip.to_canonical();
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified() || ip.is_broadcast()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mut edit: impl FnMut(&mut GatewayConfig)) -> AdmissionPolicy {
        let mut config = GatewayConfig::default();
        edit(&mut config);
        AdmissionPolicy::from_config(&config)
    }

    #[test]
    fn test_origin_patterns() {
        let exact = OriginPattern::compile("https://chat.example.org");
        assert!(exact.matches("https://chat.example.org"));
        assert!(exact.matches("HTTPS://Chat.Example.org"));
        assert!(!exact.matches("https://chat.example.org.evil.com"));

        let wildcard = OriginPattern::compile("https://*.example.org");
        assert!(wildcard.matches("https://a.example.org"));
        assert!(wildcard.matches("https://a.b.example.org"));
        assert!(!wildcard.matches("https://example.org.evil.com"));
        assert!(!wildcard.matches("http://a.example.org"));
    }

    #[test]
    fn test_empty_origin_list_allows_anything() {
        let policy = policy(|_| {});
        assert!(policy.check_origin(None).is_ok());
        assert!(policy.check_origin(Some("https://anywhere")).is_ok());
    }

    #[test]
    fn test_origin_list_rejects_missing_header() {
        let policy = policy(|c| c.server.allowed_origins = vec!["https://chat.example.org".into()]);
        assert_eq!(policy.check_origin(None), Err(AdmissionError::OriginNotAllowed));
        assert_eq!(policy.check_origin(Some("https://other.org")), Err(AdmissionError::OriginNotAllowed));
        assert!(policy.check_origin(Some("https://chat.example.org")).is_ok());
    }

    #[test]
    fn test_client_ip_ignores_forwarded_unless_trusted() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();

        let untrusted = policy(|_| {});
        assert_eq!(untrusted.client_ip(Some("203.0.113.9"), Some(peer)), Some(peer));

        let trusted = policy(|c| c.server.trust_proxy = true);
        assert_eq!(
            trusted.client_ip(Some("203.0.113.9, 10.0.0.2"), Some(peer)),
            Some("203.0.113.9".parse().unwrap())
        );
        assert_eq!(trusted.client_ip(Some("garbage"), Some(peer)), Some(peer));
        assert_eq!(trusted.client_ip(None, None), None);
    }

    #[test]
    fn test_client_ip_canonicalises_mapped_v4() {
        let policy = policy(|_| {});
        let mapped: IpAddr = "::ffff:192.0.2.5".parse().unwrap();
        assert_eq!(policy.client_ip(None, Some(mapped)), Some("192.0.2.5".parse().unwrap()));
    }

    #[test]
    fn test_private_hosts() {
        for host in [
            "localhost",
            "LOCALHOST.",
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "255.255.255.255",
            "::1",
            "[::1]",
            "::",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(is_private_host(host), "{} should be private", host);
        }
        for host in ["irc.libera.chat", "8.8.8.8", "2001:db8::1", "172.32.0.1", "1e100.net"] {
            assert!(!is_private_host(host), "{} should be public", host);
        }
    }

    #[test]
    fn test_shorthand_ipv4_forms_are_private() {
        for host in ["127.1", "2130706433", "0x7f000001", "017700000001", "10.1", "0x7f.1", "0177.0.0.1"] {
            assert!(is_private_host(host), "{} should be private", host);
        }

        let policy = policy(|_| {});
        assert_eq!(policy.check_target("127.1", 6667), Err(AdmissionError::PrivateTarget));
        assert_eq!(policy.target_from_query("host=2130706433"), Err(AdmissionError::PrivateTarget));
    }

    #[test]
    fn test_target_allowlist_is_case_insensitive() {
        let policy = policy(|c| c.upstream.allowed_servers = vec!["IRC.Example.org:6697".into()]);
        assert!(policy.check_target("irc.example.ORG", 6697).is_ok());
        assert_eq!(policy.check_target("irc.example.org", 6667), Err(AdmissionError::TargetNotAllowed));
    }

    #[test]
    fn test_private_target_blocking_can_be_disabled() {
        let blocking = policy(|_| {});
        assert_eq!(blocking.check_target("127.0.0.1", 6667), Err(AdmissionError::PrivateTarget));

        let open = policy(|c| c.upstream.block_private_hosts = false);
        assert!(open.check_target("127.0.0.1", 6667).is_ok());
    }

    #[test]
    fn test_target_from_query() {
        let policy = policy(|_| {});
        assert_eq!(policy.target_from_query("").unwrap(), None);

        let target = policy.target_from_query("host=irc.example.org&tls=true").unwrap().unwrap();
        assert_eq!(target.host, "irc.example.org");
        assert_eq!(target.port, 6697);
        assert!(target.tls);
        assert_eq!(target.encoding, "utf8");

        let target = policy.target_from_query("host=irc.example.org&port=7000&encoding=latin1").unwrap().unwrap();
        assert_eq!(target.port, 7000);
        assert!(!target.tls);
        assert_eq!(target.encoding, "latin1");
    }

    #[test]
    fn test_target_from_query_rejections() {
        let policy = policy(|_| {});
        assert!(matches!(policy.target_from_query("host=a&port=nope"), Err(AdmissionError::BadRequest(_))));
        assert!(matches!(policy.target_from_query("port=6667"), Err(AdmissionError::BadRequest(_))));
        assert!(matches!(policy.target_from_query("host=a&port=0"), Err(AdmissionError::BadRequest(_))));
        assert_eq!(policy.target_from_query("host=127.0.0.1"), Err(AdmissionError::PrivateTarget));
    }
}
