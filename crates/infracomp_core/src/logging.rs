//! Tracing initialisation.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `false` when a
/// global subscriber was already installed, which is not an error.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_tolerated() {
        init_tracing("infracomp=debug");
        assert!(!init_tracing("infracomp=debug"));
    }
}
