//! Logging setup.
//!
//! Library code logs through `tracing` macros; binaries call [`init`] once.

use tracing_subscriber::EnvFilter;

/// Covers both the `railwatch` binary and this library.
pub const DEFAULT_FILTER: &str = "railwatch=info,railwatch_client=debug";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`]. Calling it twice is harmless.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init();
}
