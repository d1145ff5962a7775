//! Logging setup for the binaries.
//!
//! Logs always go to stderr: stdout is reserved for the timestamp.

use tracing_subscriber::EnvFilter;

/// Crates whose targets the default filter covers.
const TARGETS: [&str; 4] = ["ironipc", "ironipc_core", "ironipc_transport", "ironipc_bench"];

/// Default filter directives at `level`.
#[must_use]
pub fn default_directives(level: &str) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives("debug"),
            "ironipc=debug,ironipc_core=debug,ironipc_transport=debug,ironipc_bench=debug"
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
