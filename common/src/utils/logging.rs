use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialises the process-wide `tracing` subscriber. Safe to call more than
/// once (subsequent calls are no-ops) so tests can call it freely; library
/// crates must never call this themselves, only the binary entrypoint.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}
