use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. `RUST_LOG` selects the filter; anything
/// missing or unparsable falls back to `info`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
