//! Conversion from the on-disk configuration to runtime client settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tether_config::Config;
use tether_net::{ClientConfig, FrameConfig, ReconnectConfig};

/// Build the connection manager's settings from `config`.
pub fn client_config(config: &Config) -> ClientConfig {
    let session = &config.session;
    let reconnect = &config.reconnect;
    ClientConfig {
        endpoint: config.network.endpoint(),
        connect_timeout: Duration::from_millis(config.network.connect_timeout_ms),
        heartbeat_window: Duration::from_millis(session.heartbeat_window_ms),
        request_timeout: Duration::from_millis(session.request_timeout_ms),
        login_timeout: Duration::from_millis(session.login_timeout_ms),
        ready_poll_interval: Duration::from_millis(session.ready_poll_interval_ms),
        ready_poll_attempts: session.ready_poll_attempts,
        frame: FrameConfig {
            max_record_len: session.max_record_len,
        },
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(reconnect.initial_delay_ms),
            backoff_multiplier: reconnect.backoff_multiplier.max(1.0),
            max_delay: Duration::from_millis(reconnect.max_delay_ms),
            max_attempts: reconnect.max_attempts,
            jitter: reconnect.jitter.clamp(0.0, 1.0),
        },
    }
}

/// Where the event log goes. Relative paths resolve against `data_dir`.
pub fn event_log_path(config: &Config, data_dir: &Path) -> PathBuf {
    data_dir.join(&config.log.event_log_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_over() {
        let client = client_config(&Config::default());
        let defaults = ClientConfig::default();
        assert_eq!(client.endpoint, defaults.endpoint);
        assert_eq!(client.heartbeat_window, defaults.heartbeat_window);
        assert_eq!(client.request_timeout, defaults.request_timeout);
        assert_eq!(client.login_timeout, defaults.login_timeout);
        assert_eq!(client.ready_poll_interval, defaults.ready_poll_interval);
        assert_eq!(client.ready_poll_attempts, defaults.ready_poll_attempts);
        assert_eq!(client.frame.max_record_len, defaults.frame.max_record_len);
        assert_eq!(client.reconnect.max_attempts, None);
    }

    #[test]
    fn test_out_of_range_backoff_is_clamped() {
        let mut config = Config::default();
        config.reconnect.jitter = 3.0;
        config.reconnect.backoff_multiplier = 0.5;
        let client = client_config(&config);
        assert_eq!(client.reconnect.jitter, 1.0);
        assert_eq!(client.reconnect.backoff_multiplier, 1.0);
    }

    #[test]
    fn test_event_log_path_resolution() {
        let data = Path::new("/var/lib/tether");
        let config = Config::default();
        assert_eq!(event_log_path(&config, data), data.join("events.log"));

        let mut absolute = Config::default();
        absolute.log.event_log_file = std::env::temp_dir().join("session.log");
        assert_eq!(
            event_log_path(&absolute, data),
            std::env::temp_dir().join("session.log")
        );
    }
}
