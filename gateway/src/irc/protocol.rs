// gateway/src/irc/protocol.rs
//! The handful of IRC grammar the gateway needs to understand itself.
//! Everything else passes through untouched.
use common::strip_crlf;
use common::webirc::build_webirc_command;

use super::ConnectOptions;

/// Lines sent right after the socket opens, in order: WEBIRC, PASS, CAP LS, NICK, USER
pub fn registration_lines(options: &ConnectOptions) -> Vec<String> {
    let mut lines = Vec::with_capacity(5);

    if let Some(webirc) = &options.webirc {
        lines.push(build_webirc_command(
            &webirc.password,
            &webirc.gateway_name,
            &webirc.hostname,
            &webirc.ip,
        ));
    }

    if let Some(password) = options.password.as_deref().filter(|p| !p.is_empty()) {
        lines.push(format!("PASS {}", strip_crlf(password)));
    }

    lines.push("CAP LS 302".to_string());
    lines.push(format!("NICK {}", strip_crlf(&options.nick)));
    lines.push(format!(
        "USER {} 0 * :{}",
        strip_crlf(&options.username),
        strip_crlf(&options.realname)
    ));

    lines
}

/// True for RPL_WELCOME: `[@tags ]:<server> 001 ...`
///
/// The source must be a bare server name; a `nick!user@host` prefix is a
/// user talking, not the server welcoming us.
pub fn is_welcome(line: &str) -> bool {
    let mut rest = line;
    if rest.starts_with('@') {
        rest = match rest.split_once(' ') {
            Some((_, after)) => after.trim_start_matches(' '),
            None => return false,
        };
    }

    let Some(prefixed) = rest.strip_prefix(':') else {
        return false;
    };
    let Some((source, after)) = prefixed.split_once(' ') else {
        return false;
    };
    if source.is_empty() || source.contains('!') || source.contains('@') {
        return false;
    }

    after.trim_start_matches(' ').split(' ').next() == Some("001")
}

/// `PONG` reply for a server `PING`, echoing its argument verbatim
pub fn ping_reply(line: &str) -> Option<String> {
    line.strip_prefix("PING ").map(|token| format!("PONG {}", token))
}

pub fn quit_line(reason: &str) -> String {
    let reason = strip_crlf(reason);
    if reason.is_empty() {
        "QUIT".to_string()
    } else {
        format!("QUIT :{}", reason)
    }
}
