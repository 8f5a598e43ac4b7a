//! Structured logging and the connection event log for Tether.
//!
//! Diagnostics go through the `tracing` ecosystem: console output with
//! uptime timestamps and module paths, plus optional JSON file logging for
//! post-mortem analysis. The separate [`EventLog`] collaborator records the
//! plain-text history of a session (general notes, sent frames, received
//! frames, errors) and is handed explicitly to whoever produces those events.

mod events;

pub use events::{EventClass, EventLog, FileEventLog, NullEventLog, TracingEventLog};

use std::path::Path;
use tether_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config supplies one.
const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from the config's
/// `log.log_level`, otherwise `info`. Console output always carries uptime
/// timestamps and targets. With `file_logging` and a usable `log_dir`, the
/// same events are also written as JSON lines to `tether.log`.
///
/// # Examples
///
/// ```no_run
/// use tether_log::init_logging;
/// use tether_config::Config;
///
/// // Basic initialization
/// init_logging(None, false, None);
///
/// // With config override and JSON file output
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, file_logging: bool, config: Option<&Config>) {
    let filter_str = config
        .map(|c| c.log.log_level.as_str())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if file_logging
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("tether.log"))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter = default_env_filter();
        assert!(format!("{}", filter).contains("info"));
    }

    #[test]
    fn test_subsystem_filter() {
        let filter = EnvFilter::new("info,tether_net=debug");
        let filter_str = format!("{}", filter);
        assert!(filter_str.contains("tether_net=debug"));
        assert!(filter_str.contains("info"));
    }

    #[test]
    fn test_env_filter_parsing() {
        let valid_filters = [
            "info",
            "debug,tether_net=trace",
            "warn,tether_net=debug,tether::events=info",
            "error",
        ];

        for filter_str in &valid_filters {
            let result = EnvFilter::try_from(*filter_str);
            assert!(result.is_ok(), "Failed to parse filter: {}", filter_str);
        }
    }
}
