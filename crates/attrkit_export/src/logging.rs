use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::conf::C_LOG_FILTER_DEFAULT;

/// Install the global `tracing` subscriber (stderr, `RUST_LOG` aware).
///
/// Safe to call repeatedly; only the first call installs anything.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(C_LOG_FILTER_DEFAULT));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
        tracing::info!("logging initialized twice");
    }
}
