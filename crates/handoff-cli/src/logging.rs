//! Diagnostic tracing to stderr.
//!
//! Command output (progress, summaries, JSON) goes to stdout through
//! `println!` and is unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` selects the filter, `warn` if
/// unset.
///
/// ```bash
/// RUST_LOG=handoff_core=debug handoff start add-auth
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
