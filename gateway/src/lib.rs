// gateway/src/lib.rs
//! WebSocket to IRC gateway: each browser connection drives one upstream IRC
//! connection, with admission control in front and WEBIRC identity spoofing
//! towards the server.
pub mod actors;
pub mod admission;
pub mod error;
pub mod irc;
pub mod rate_limiter;
pub mod routing;

pub use routing::GatewayState;
