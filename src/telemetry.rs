//! Telemetry initialization.
//!
//! Structured logging via `tracing`. The level comes from the resolved
//! [`LogLevel`](crate::config::LogLevel) (`FORGE_LOG`); `RUST_LOG` still
//! wins when set, so targeted filters keep working. `silent` installs
//! nothing at all.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Initialize the global subscriber. Safe to call once per process;
/// repeated calls (tests) are ignored.
pub fn init(level: LogLevel) {
    let Some(base) = level.as_filter() else {
        return;
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
