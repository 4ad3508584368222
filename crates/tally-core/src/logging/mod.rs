//! Structured logging setup on top of `tracing`.
//!
//! The engine logs through `tracing` macros with structured fields
//! (`subscription_id`, `bundle_id`, `event_id`). Embedders pick the output
//! format here; tests use [`capture_logs`] to assert on emitted lines.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Install the subscriber selected by configuration: JSON lines when `json`
/// is set, the compact human format otherwise.
///
/// Does nothing if a global subscriber is already installed.
pub fn init(level: &str, json: bool) {
    if json {
        init_json_subscriber(level);
    } else {
        init_subscriber(level);
    }
}

/// Install a human-readable stderr subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Later calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Install a JSON-lines stderr subscriber for log shipping.
pub fn init_json_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init("warn", false);
        init("debug", false);
        init("info", true);
    }
}
