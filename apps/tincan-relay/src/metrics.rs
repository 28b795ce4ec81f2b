use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static ENVELOPES_POSTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("relay_envelopes_posted_total", "Envelopes accepted by the relay"),
        &["kind", "target"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static POSTS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("relay_posts_rejected_total", "Envelope submissions refused"),
        &["reason"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SIGNAL_POLLS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("relay_signal_polls_total", "GET /signal requests served").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static DISCOVERY_LOOKUPS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "relay_discovery_lookups_total",
        "GET /discovery requests served",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Prometheus text exposition of every relay metric.
pub fn render() -> String {
    // Touch the lazies so every family shows up before its first increment.
    Lazy::force(&ENVELOPES_POSTED);
    Lazy::force(&POSTS_REJECTED);
    Lazy::force(&SIGNAL_POLLS);
    Lazy::force(&DISCOVERY_LOOKUPS);

    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(target: "tincan::relay", error = %err, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
