//! Logging utilities for airank-core
//!
//! Re-exports tracing macros with log_* naming convention for consistency,
//! plus a subscriber initializer used by the service binaries.

#[allow(unused_imports)]
pub use tracing::{
    debug as log_debug, error as log_error, info as log_info, trace as log_trace, warn as log_warn,
};

/// Initialize a process-wide tracing subscriber.
///
/// Honors `RUST_LOG` via [`tracing_subscriber::EnvFilter`]. When
/// `AIRANK_LOG_FORMAT=json` is set, emits newline-delimited JSON suitable for
/// log aggregation; otherwise uses the human-readable default formatter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("AIRANK_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
