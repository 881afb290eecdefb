//! Tracing setup for the `sql-replay` binary.
//!
//! Logs go to stderr; stdout is reserved for failure diagnostics and the
//! run summary. `RUST_LOG` overrides the default filter.

use tracing_subscriber::EnvFilter;

/// Default filter directive for the given verbosity.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "sql_replay=debug,sqlx=warn"
    } else {
        "sql_replay=info,sqlx=warn"
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

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
    fn test_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directive(verbose)).is_ok());
        }
    }

    #[test]
    fn test_init_twice() {
        init(false);
        init(true);
    }
}
