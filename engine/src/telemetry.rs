//! Telemetry
//!
//! Sets up `tracing-subscriber` for structured logging. Log output goes to
//! stderr so that command results on stdout (including `--json` output) stay
//! machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for a log level
fn default_filter(log_level: &str) -> String {
    format!("{},dossier_engine={}", log_level, log_level)
}

/// Initialize the tracing subscriber with the given log level.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter.
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
///
/// Calling this more than once is harmless; only the first call installs a
/// subscriber.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize the tracing subscriber at "info".
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_names_crate() {
        assert_eq!(default_filter("debug"), "debug,dossier_engine=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_telemetry_with_level("warn");
        init_telemetry();
    }
}
