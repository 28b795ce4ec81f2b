//! Talking to the signaling relay.

mod cursor;
mod local;

pub use cursor::SignalCursor;
pub use local::LocalRelay;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tincan_signal::{DiscoveryKey, PostEnvelope, SignalBatch, StoreError};
use url::Url;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("invalid relay configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("relay rejected envelope: {0}")]
    Rejected(String),
    #[error("relay store error: {0}")]
    Store(#[from] StoreError),
}

/// Relay operations a peer needs.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn post(&self, envelope: PostEnvelope) -> Result<(), SignalingError>;

    /// Envelopes addressed to `peer_id` plus everything visible in this network scope.
    async fn fetch(&self, peer_id: Option<&str>) -> Result<SignalBatch, SignalingError>;

    async fn discovery_key(&self) -> Result<String, SignalingError>;
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    base_url: Url,
}

impl RelayConfig {
    pub fn new(relay_url: impl AsRef<str>) -> Result<Self, SignalingError> {
        let mut base = relay_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(SignalingError::InvalidConfig(
                "relay url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            let inferred_scheme = infer_scheme(&base);
            base = format!("{inferred_scheme}{base}");
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|err| SignalingError::InvalidConfig(format!("invalid relay url: {err}")))?;
        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, SignalingError> {
        self.base_url.join(path).map_err(|err| {
            SignalingError::InvalidConfig(format!("invalid {path} endpoint: {err}"))
        })
    }
}

/// LAN and loopback relays are plain http; anything else is assumed to sit behind TLS.
fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower.starts_with("0.0.0.0")
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
        || host_lower.ends_with(".local")
        || host_lower.contains(".local:")
        || host_lower
            .strip_prefix("172.")
            .and_then(|rest| rest.split('.').next())
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| (16..32).contains(&octet))
            .unwrap_or(false)
    {
        "http://"
    } else {
        "https://"
    }
}

pub struct HttpRelayClient {
    config: RelayConfig,
    client: reqwest::Client,
}

impl HttpRelayClient {
    pub fn new(config: RelayConfig) -> Result<Self, SignalingError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .no_proxy()
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn post(&self, envelope: PostEnvelope) -> Result<(), SignalingError> {
        let endpoint = self.config.endpoint("signal")?;
        let response = self.client.post(endpoint).json(&envelope).send().await?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let reason = body
                .get("error")
                .and_then(|error| error.as_str())
                .unwrap_or("bad request")
                .to_string();
            return Err(SignalingError::Rejected(reason));
        }
        if !status.is_success() {
            return Err(SignalingError::HttpStatus(status));
        }
        Ok(())
    }

    async fn fetch(&self, peer_id: Option<&str>) -> Result<SignalBatch, SignalingError> {
        let endpoint = self.config.endpoint("signal")?;
        let mut request = self.client.get(endpoint);
        if let Some(peer_id) = peer_id {
            request = request.query(&[("peerId", peer_id)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SignalingError::HttpStatus(response.status()));
        }
        Ok(response.json::<SignalBatch>().await?)
    }

    async fn discovery_key(&self) -> Result<String, SignalingError> {
        let endpoint = self.config.endpoint("discovery")?;
        let response = self.client.get(endpoint).send().await?;
        if !response.status().is_success() {
            return Err(SignalingError::HttpStatus(response.status()));
        }
        Ok(response.json::<DiscoveryKey>().await?.discovery_key)
    }
}
