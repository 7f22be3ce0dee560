// common/src/utils.rs
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use chrono::Utc;

/// Setup tracing for consistent logging across the gateway
pub fn setup_tracing(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Run `f` with a temporary INFO subscriber on this thread, for work that
/// happens before [`setup_tracing`] knows the configured level
pub fn with_bootstrap_tracing<T>(f: impl FnOnce() -> T) -> T {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Remove CR and LF so a caller supplied value cannot terminate an IRC line early
pub fn strip_crlf(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Milliseconds since the Unix epoch, used as an opaque keepalive payload
pub fn timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}
