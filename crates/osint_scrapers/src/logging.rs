use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "osint_core=debug,osint_storage=debug,osint_scrapers=debug,osint=debug,info",
        _ => "trace",
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` wins over `verbosity` when
/// set. Later calls are no-ops, so tests may call this freely.
pub fn init_logging(verbosity: u8) {
    INIT.call_once(|| {
        if tracing::dispatcher::has_been_set() {
            return;
        }
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(verbosity > 0)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(0);
        init_logging(2);
        tracing::info!("logging initialised twice without panicking");
    }

    #[test]
    fn test_verbosity_directives() {
        assert_eq!(default_directive(0), "info");
        assert!(default_directive(1).contains("osint_scrapers=debug"));
        assert_eq!(default_directive(5), "trace");
    }
}
