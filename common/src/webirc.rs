//! WEBIRC line construction and pseudo-hostnames for web clients.
use std::net::IpAddr;

use crate::utils::strip_crlf;

/// `WEBIRC <password> <gateway> <hostname> <ip>` with every field CR/LF-stripped
pub fn build_webirc_command(password: &str, gateway_name: &str, hostname: &str, ip: &str) -> String {
    format!(
        "WEBIRC {} {} {} {}",
        strip_crlf(password),
        strip_crlf(gateway_name),
        strip_crlf(hostname),
        strip_crlf(ip),
    )
}

/// Hex-encode every octet of `ip` and append `suffix`.
///
/// IPv4 yields 8 hex digits, IPv6 yields 32 (the fully expanded 8 groups).
/// IPv4-mapped IPv6 addresses are treated as the IPv4 address they carry.
pub fn resolve_client_hostname(ip: IpAddr, suffix: &str) -> String {
    let encoded = match ip.to_canonical() {
        IpAddr::V4(v4) => hex::encode(v4.octets()),
        IpAddr::V6(v6) => hex::encode(v6.octets()),
    };
    format!("{}{}", encoded, suffix)
}
