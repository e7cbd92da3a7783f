//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the level follows `-q`/`-v`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8, quiet: bool) -> String {
    let level = match (quiet, verbosity) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let http = if verbosity == 0 { "warn" } else { level };
    format!("{level},tower_http={http},hyper=warn,reqwest=warn")
}

/// Install the global subscriber. Logs go to stderr; later calls are no-ops.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2),
        )
        .try_init();
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_verbosity() {
        assert!(default_directive(3, true).starts_with("warn,"));
    }

    #[test]
    fn verbosity_raises_level() {
        assert!(default_directive(0, false).starts_with("info,tower_http=warn"));
        assert!(default_directive(1, false).starts_with("debug,tower_http=debug"));
        assert!(default_directive(5, false).starts_with("trace,"));
    }

    #[test]
    fn directive_parses() {
        for verbosity in 0..3 {
            assert!(EnvFilter::try_new(default_directive(verbosity, false)).is_ok());
        }
    }
}
