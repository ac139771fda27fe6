//! Logging init: structured events to stderr, filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

/// Initialize logging to stderr. `verbose` turns on per-page and per-probe events.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "info,proxy_harvester=debug"
    } else {
        DEFAULT_FILTER
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
