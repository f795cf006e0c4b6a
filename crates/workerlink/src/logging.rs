//! Log output setup.
//!
//! Everything in this workspace logs through `tracing`. Binaries and tests
//! call [`init`] once; the filter comes from `RUST_LOG` and defaults to
//! `warn`. Output goes to stderr, since a process worker's stdout carries
//! frames.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Fails if one is already installed, which
/// callers that may run more than once (tests) can ignore.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
}
