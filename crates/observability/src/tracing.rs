//! Tracing/logging initialization.
//!
//! JSON lines on stderr. The filter comes from `BROKERDESK_LOG`, then
//! `RUST_LOG`, then defaults to `info`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "BROKERDESK_LOG";
pub const DEFAULT_DIRECTIVES: &str = "info";

/// Pick the filter directives from the given environment lookup.
pub fn directives_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    [LOG_ENV, "RUST_LOG"]
        .into_iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_filter(&directives_from(|key| std::env::var(key).ok()));
}

/// Initialize with explicit directives; invalid ones fall back to `info`.
pub fn init_with_filter(directives: &str) {
    let filter =
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
