//! Logging setup
//!
//! The library only emits `tracing` events; binaries decide where they go.
//! [`init`] installs a stderr subscriber so stdout stays reserved for JSON
//! output. The filter is read from `OMNIDB_LOG` (same syntax as `RUST_LOG`)
//! and defaults to `warn`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "OMNIDB_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Filter from `OMNIDB_LOG`, falling back to `warn` when unset or invalid
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber
///
/// A second call (or a subscriber installed elsewhere) is left in place.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        init();
        init();
        tracing::warn!("logging initialised twice");
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(EnvFilter::new(DEFAULT_FILTER).to_string(), "warn");
    }
}
