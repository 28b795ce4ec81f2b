use std::env;
use std::time::Duration;

use crate::cli::ServeArgs;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// When unset the relay keeps envelopes in process memory.
    pub redis_url: Option<String>,
    pub signal_ttl_seconds: u64,
    /// Derive the network scope from `X-Forwarded-For` when a proxy sits in front of the relay.
    pub trust_forwarded: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env::var("TINCAN_RELAY_BIND").unwrap_or(defaults.bind),
            port: env::var("TINCAN_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            redis_url: env::var("REDIS_URL")
                .ok()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            signal_ttl_seconds: env::var("SIGNAL_TTL")
                .ok()
                .and_then(|t| t.parse().ok())
                .filter(|t| *t > 0)
                .unwrap_or(defaults.signal_ttl_seconds),
            trust_forwarded: env::var("TINCAN_RELAY_TRUST_FORWARDED")
                .map(|value| matches_truthy(&value))
                .unwrap_or(defaults.trust_forwarded),
        }
    }

    /// Command-line flags win over the environment.
    pub fn with_args(mut self, args: &ServeArgs) -> Self {
        if let Some(bind) = &args.bind {
            self.bind = bind.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(url) = &args.redis_url {
            self.redis_url = Some(url.clone());
        }
        if let Some(ttl) = args.ttl {
            self.signal_ttl_seconds = ttl.max(1);
        }
        if args.no_forwarded {
            self.trust_forwarded = false;
        }
        self
    }

    pub fn signal_ttl(&self) -> Duration {
        Duration::from_secs(self.signal_ttl_seconds)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            redis_url: None,
            signal_ttl_seconds: 60,
            trust_forwarded: true,
        }
    }
}

fn matches_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
