//! Diagnostic tracing for the orchestrator.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. User-facing
//! progress is printed by the binary from run events and is unaffected by the
//! filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,forge=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn,forge=info`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=forge=debug forge --config forge.toml
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
