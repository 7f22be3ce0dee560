pub mod messages;
pub mod config;
pub mod utils;
pub mod encoding;
pub mod webirc;
pub mod crypto;
pub mod models;

pub use messages::*;
pub use config::*;
pub use utils::*;
pub use models::*;
pub use crypto::{CipherError, PayloadCipher};
