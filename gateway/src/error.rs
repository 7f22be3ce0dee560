// gateway/src/error.rs
use std::io;
use std::net::IpAddr;

use actix_web::{http::{header, StatusCode}, HttpResponse, ResponseError};

use crate::irc::codec::LineCodecError;

/// Why an upgrade request was refused. Each variant maps to one status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("origin not allowed")]
    OriginNotAllowed,
    #[error("upstream server not allowed")]
    TargetNotAllowed,
    #[error("upstream server resolves to a private or local address")]
    PrivateTarget,
    #[error("too many connections from this address")]
    TooManyPerIp,
    #[error("gateway is full")]
    ServerFull,
}

impl ResponseError for AdmissionError {
    fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdmissionError::OriginNotAllowed
            | AdmissionError::TargetNotAllowed
            | AdmissionError::PrivateTarget => StatusCode::FORBIDDEN,
            AdmissionError::TooManyPerIp => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::ServerFull => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if *self == AdmissionError::TooManyPerIp {
            response.append_header((header::RETRY_AFTER, "60"));
        }
        response.body(self.to_string())
    }
}

/// Failures of an upstream IRC connection. The display text is what the browser sees.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),
    #[error("TLS handshake failed: {0}")]
    Tls(#[source] io::Error),
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),
    #[error("refusing to connect to private address {0}")]
    PrivateAddress(IpAddr),
    #[error("connection timed out")]
    ConnectTimeout,
    #[error("peer unresponsive")]
    PeerUnresponsive,
    #[error("server sent an unterminated line longer than the receive buffer")]
    LineTooLong,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl From<LineCodecError> for UpstreamError {
    fn from(err: LineCodecError) -> Self {
        match err {
            LineCodecError::LineTooLong => UpstreamError::LineTooLong,
            LineCodecError::Io(e) => UpstreamError::Io(e),
        }
    }
}
