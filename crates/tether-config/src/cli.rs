//! Command-line argument parsing for the Tether client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tether command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tether", about = "Heartbeat-supervised request/response client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Identity sent at login.
    #[arg(long)]
    pub name: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Event log file (overrides the configured one).
    #[arg(long)]
    pub event_log: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref name) = args.name {
            self.network.identity = name.clone();
        }
        if let Some(ref level) = args.log_level {
            self.log.log_level = level.clone();
        }
        if let Some(ref path) = args.event_log {
            self.log.event_log_file = path.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            name: Some("carol".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.network.identity, "carol");
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, 8124);
        assert_eq!(config.log.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "tether",
            "--port",
            "9001",
            "--log-level",
            "debug",
            "--event-log",
            "/tmp/tether-events.log",
        ]);
        assert_eq!(args.port, Some(9001));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(
            args.event_log,
            Some(PathBuf::from("/tmp/tether-events.log"))
        );
        assert!(args.server.is_none());
    }

    #[test]
    fn test_blank_identity_override_fails_validation() {
        let mut config = Config::default();
        let args = CliArgs::parse_from(["tether", "--name", ""]);
        config.apply_cli_overrides(&args);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::parse_from(["tether", "--server", " "]));
        assert!(config.validate().is_err());
    }
}
