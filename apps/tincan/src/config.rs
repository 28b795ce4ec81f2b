use std::env;
use std::time::Duration;

pub const DEFAULT_RELAY: &str = "127.0.0.1:8080";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Client-side knobs. Every field can be overridden from the environment; the relay URL and the
/// timings can be overridden again from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay base URL; a bare `host:port` gets its scheme inferred.
    pub relay_url: String,
    /// How often a live session polls the relay for envelopes addressed to it.
    pub poll_interval: Duration,
    /// How often the lobby rescans room advertisements.
    pub discovery_interval: Duration,
    /// How often a host re-sends its room advertisement.
    pub heartbeat_interval: Duration,
    /// How long a joiner waits for the host to admit it.
    pub handshake_timeout: Duration,
    pub key_salt: String,
    pub stun_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY.to_string(),
            poll_interval: Duration::from_secs(2),
            discovery_interval: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            key_salt: crate::crypto::DEFAULT_SALT.to_string(),
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let stun_servers = if env_truthy("TINCAN_DISABLE_STUN") {
            Vec::new()
        } else {
            env::var("TINCAN_STUN_SERVERS")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|server| !server.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.stun_servers)
        };

        Self {
            relay_url: non_empty_var("TINCAN_RELAY_URL").unwrap_or(defaults.relay_url),
            poll_interval: millis_var("TINCAN_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            discovery_interval: millis_var("TINCAN_DISCOVERY_INTERVAL_MS")
                .unwrap_or(defaults.discovery_interval),
            heartbeat_interval: millis_var("TINCAN_HEARTBEAT_INTERVAL_MS")
                .unwrap_or(defaults.heartbeat_interval),
            handshake_timeout: millis_var("TINCAN_HANDSHAKE_TIMEOUT_MS")
                .unwrap_or(defaults.handshake_timeout),
            key_salt: non_empty_var("TINCAN_KEY_SALT").unwrap_or(defaults.key_salt),
            stun_servers,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn millis_var(name: &str) -> Option<Duration> {
    non_empty_var(name)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
}

pub(crate) fn env_truthy(name: &str) -> bool {
    env::var(name)
        .map(|value| value != "0" && !value.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "TINCAN_RELAY_URL",
        "TINCAN_POLL_INTERVAL_MS",
        "TINCAN_DISCOVERY_INTERVAL_MS",
        "TINCAN_HEARTBEAT_INTERVAL_MS",
        "TINCAN_HANDSHAKE_TIMEOUT_MS",
        "TINCAN_KEY_SALT",
        "TINCAN_STUN_SERVERS",
        "TINCAN_DISABLE_STUN",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn defaults_follow_protocol_timings() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.discovery_interval, Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.key_salt, "local-salt");
    }

    #[test]
    fn from_env_without_overrides_matches_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert_eq!(ClientConfig::from_env(), ClientConfig::default());
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("TINCAN_RELAY_URL", "relay.lan:9000");
            env::set_var("TINCAN_POLL_INTERVAL_MS", "1500");
            env::set_var("TINCAN_HANDSHAKE_TIMEOUT_MS", "0");
            env::set_var("TINCAN_STUN_SERVERS", "stun:a:1, ,stun:b:2");
        }
        let config = ClientConfig::from_env();
        assert_eq!(config.relay_url, "relay.lan:9000");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        // zero is not a usable timeout
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.stun_servers, vec!["stun:a:1", "stun:b:2"]);

        unsafe {
            env::set_var("TINCAN_DISABLE_STUN", "1");
        }
        assert!(ClientConfig::from_env().stun_servers.is_empty());
        clear_env();
    }
}
