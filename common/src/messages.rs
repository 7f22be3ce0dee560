// common/src/messages.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw envelope as it travels over the WebSocket: `{"type": .., "data": ..}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid payload for '{kind}': {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },
}

/// Upstream server as requested by the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub nick: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    /// May be omitted when the upgrade request pinned a target
    #[serde(default)]
    pub server: Option<ServerSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingRequest {
    pub name: String,
}

/// Command sent by the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Connect(ConnectRequest),
    Disconnect(DisconnectRequest),
    Raw(RawRequest),
    Encoding(EncodingRequest),
    /// Any kind the gateway does not know; always ignored
    Unrecognized(String),
}

impl ClientCommand {
    /// Decode a JSON text frame, validating the payload of known kinds
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, EnvelopeError> {
        let Envelope { kind, data } = envelope;
        let command = match kind.as_str() {
            "connect" => serde_json::from_value(data).map(ClientCommand::Connect),
            // `disconnect` carries an optional payload
            "disconnect" if data.is_null() => Ok(ClientCommand::Disconnect(DisconnectRequest::default())),
            "disconnect" => serde_json::from_value(data).map(ClientCommand::Disconnect),
            "raw" => serde_json::from_value(data).map(ClientCommand::Raw),
            "encoding" => serde_json::from_value(data).map(ClientCommand::Encoding),
            _ => return Ok(ClientCommand::Unrecognized(kind)),
        };
        command.map_err(|source| EnvelopeError::Payload { kind, source })
    }
}

/// Notification sent to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// TCP/TLS connection to the IRC server is up
    SocketConnected,
    /// The IRC server accepted registration (RPL_WELCOME)
    Connected,
    Close,
    Error { message: String },
    /// A line sent by the IRC server
    Irc { line: String },
    /// A line the gateway sent upstream on the client's behalf
    Echo { line: String },
    /// The gateway refused a command
    GatewayError { message: String },
}

impl ServerEvent {
    pub fn gateway_error(message: impl Into<String>) -> Self {
        ServerEvent::GatewayError { message: message.into() }
    }

    pub fn to_json(&self) -> String {
        // Plain enum of strings, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
