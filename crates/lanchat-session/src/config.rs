//! Session configuration loaded from environment variables.
//!
//! Every setting has a default so a session can start with zero
//! configuration against a relay on localhost.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lanchat_shared::constants::*;

/// Which presence model the session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Central relay server over WebSocket.
    #[default]
    Relay,
    /// Shared LAN broadcast channel, no server.
    Beacon,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relay" => Ok(BackendKind::Relay),
            "beacon" | "lan" => Ok(BackendKind::Beacon),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Retries allowed after an unexpected close before giving up.
    /// Env: `LANCHAT_RECONNECT_ATTEMPTS`
    pub max_attempts: u32,

    /// Env: `LANCHAT_RECONNECT_DELAY` (ms)
    pub base_delay: Duration,

    /// Env: `LANCHAT_MAX_RECONNECT_DELAY` (ms)
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_RECONNECT_DELAY_MS),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Env: `LANCHAT_MODE` (`relay` / `beacon`)
    /// Default: `relay`
    pub backend: BackendKind,

    /// Relay WebSocket URL.
    /// Env: `LANCHAT_WS_URL`
    pub relay_url: String,

    /// Base URL of the file upload/download endpoints.
    /// Env: `LANCHAT_HTTP_URL`
    pub http_url: String,

    /// Env: `LANCHAT_BEACON_BIND`
    pub beacon_bind: SocketAddr,

    /// Env: `LANCHAT_BEACON_TARGET`
    pub beacon_target: SocketAddr,

    pub reconnect: ReconnectConfig,

    /// Beacon heartbeat period, also the beacon sweep period.
    /// Env: `LANCHAT_HEARTBEAT_INTERVAL` (ms)
    pub heartbeat_interval: Duration,

    /// Relay `refresh-devices` period.
    /// Env: `LANCHAT_DEVICE_REFRESH_INTERVAL` (ms)
    pub device_refresh_interval: Duration,

    /// Env: `LANCHAT_STALENESS_THRESHOLD` (ms)
    pub staleness_threshold: Duration,

    /// Env: `LANCHAT_MAX_FILE_SIZE` (bytes)
    pub max_file_size: u64,

    /// Env: `LANCHAT_MAX_MESSAGE_LENGTH` (characters)
    pub max_message_length: usize,

    /// Open the transport as soon as the session starts.
    /// Env: `LANCHAT_AUTO_CONNECT` (true/false)
    pub auto_connect: bool,

    /// Identity database location; `None` means the platform data dir.
    /// Env: `LANCHAT_DB_PATH`
    pub db_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Relay,
            relay_url: DEFAULT_WS_URL.to_string(),
            http_url: DEFAULT_HTTP_URL.to_string(),
            beacon_bind: ([0, 0, 0, 0], DEFAULT_BEACON_PORT).into(),
            beacon_target: ([255, 255, 255, 255], DEFAULT_BEACON_PORT).into(),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            device_refresh_interval: Duration::from_millis(DEFAULT_DEVICE_REFRESH_INTERVAL_MS),
            staleness_threshold: Duration::from_millis(DEFAULT_STALENESS_THRESHOLD_MS as u64),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            auto_connect: true,
            db_path: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "LANCHAT_MODE", &mut config.backend);

        if let Some(url) = lookup("LANCHAT_WS_URL") {
            config.relay_url = url;
        }
        if let Some(url) = lookup("LANCHAT_HTTP_URL") {
            config.http_url = url;
        }

        parse_into(&lookup, "LANCHAT_BEACON_BIND", &mut config.beacon_bind);
        parse_into(&lookup, "LANCHAT_BEACON_TARGET", &mut config.beacon_target);

        parse_into(
            &lookup,
            "LANCHAT_RECONNECT_ATTEMPTS",
            &mut config.reconnect.max_attempts,
        );
        parse_millis(&lookup, "LANCHAT_RECONNECT_DELAY", &mut config.reconnect.base_delay);
        parse_millis(
            &lookup,
            "LANCHAT_MAX_RECONNECT_DELAY",
            &mut config.reconnect.max_delay,
        );
        parse_millis(&lookup, "LANCHAT_HEARTBEAT_INTERVAL", &mut config.heartbeat_interval);
        parse_millis(
            &lookup,
            "LANCHAT_DEVICE_REFRESH_INTERVAL",
            &mut config.device_refresh_interval,
        );
        parse_millis(
            &lookup,
            "LANCHAT_STALENESS_THRESHOLD",
            &mut config.staleness_threshold,
        );

        parse_into(&lookup, "LANCHAT_MAX_FILE_SIZE", &mut config.max_file_size);
        parse_into(
            &lookup,
            "LANCHAT_MAX_MESSAGE_LENGTH",
            &mut config.max_message_length,
        );
        parse_into(&lookup, "LANCHAT_AUTO_CONNECT", &mut config.auto_connect);

        if let Some(path) = lookup("LANCHAT_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if config.reconnect.max_delay < config.reconnect.base_delay {
            tracing::warn!(
                base_ms = config.reconnect.base_delay.as_millis() as u64,
                max_ms = config.reconnect.max_delay.as_millis() as u64,
                "Max reconnect delay below base delay, raising it"
            );
            config.reconnect.max_delay = config.reconnect.base_delay;
        }

        config
    }

    /// Staleness threshold in wire milliseconds.
    pub fn staleness_millis(&self) -> i64 {
        i64::try_from(self.staleness_threshold.as_millis()).unwrap_or(i64::MAX)
    }
}

fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid setting, using default"),
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    parse_into(lookup, key, &mut millis);
    if millis == 0 {
        tracing::warn!(key, "Zero duration not allowed, using default");
        return;
    }
    *slot = Duration::from_millis(millis);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> SessionConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.backend, BackendKind::Relay);
        assert_eq!(config.relay_url, DEFAULT_WS_URL);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(10));
        assert_eq!(config.staleness_millis(), 10_000);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert!(config.auto_connect);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("LANCHAT_MODE", "beacon"),
            ("LANCHAT_WS_URL", "ws://relay:9000"),
            ("LANCHAT_RECONNECT_ATTEMPTS", "2"),
            ("LANCHAT_RECONNECT_DELAY", "250"),
            ("LANCHAT_BEACON_TARGET", "192.168.1.255:5000"),
            ("LANCHAT_AUTO_CONNECT", "false"),
            ("LANCHAT_DB_PATH", "/tmp/chat.db"),
        ]);
        assert_eq!(config.backend, BackendKind::Beacon);
        assert_eq!(config.relay_url, "ws://relay:9000");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(250));
        assert_eq!(config.beacon_target.port(), 5000);
        assert!(!config.auto_connect);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/chat.db")));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("LANCHAT_MODE", "carrier-pigeon"),
            ("LANCHAT_RECONNECT_ATTEMPTS", "many"),
            ("LANCHAT_HEARTBEAT_INTERVAL", "0"),
            ("LANCHAT_BEACON_BIND", "nowhere"),
        ]);
        assert_eq!(config.backend, BackendKind::Relay);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(config.beacon_bind.port(), DEFAULT_BEACON_PORT);
    }

    #[test]
    fn test_max_delay_raised_to_base() {
        let config = config_from(&[
            ("LANCHAT_RECONNECT_DELAY", "5000"),
            ("LANCHAT_MAX_RECONNECT_DELAY", "100"),
        ]);
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(5));
    }
}
