//! Logging setup based on `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,bundlekit_assets=debug";

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`].
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

/// Install a formatting subscriber with explicit filter directives.
///
/// ```no_run
/// bundlekit_core::logging::init_with_filter("warn,bundlekit_assets=trace");
/// ```
pub fn init_with_filter(directives: &str) {
    install(EnvFilter::new(directives));
}

fn install(filter: EnvFilter) {
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_err()
    {
        tracing::trace!("global subscriber already installed");
    }
}
