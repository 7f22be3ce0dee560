// gateway/src/actors/mod.rs
pub mod client_session_actor;
pub mod irc_client_actor;
pub mod session_registry;
