//! Subscriber setup for the binaries. The library itself only emits events.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use crate::error::{NutriError, Result};

/// Level for a `-v` count: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `verbosity`. Fails if a subscriber is
/// already installed.
pub fn init(verbosity: u8, json: bool) -> Result<()> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nutripredict={},warn", level)));

    let installed = if json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr);
        Registry::default().with(filter).with(layer).try_init()
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        Registry::default().with(filter).with(layer).try_init()
    };
    installed.map_err(|e| NutriError::Config(format!("logging already initialised: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for(0), Level::WARN);
        assert_eq!(level_for(1), Level::INFO);
        assert_eq!(level_for(2), Level::DEBUG);
        assert_eq!(level_for(9), Level::TRACE);
    }
}
