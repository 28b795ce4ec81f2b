use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tincan_signal::{
    DiscoveryKey, EnvelopeKind, EnvelopeStore, PostAck, PostEnvelope, collect_signals,
    forwarded_client, scope_key,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::metrics;

pub type SharedStore = Arc<dyn EnvelopeStore>;

#[derive(Clone)]
pub struct RelayState {
    pub store: SharedStore,
    pub trust_forwarded: bool,
}

impl RelayState {
    pub fn new(store: SharedStore, trust_forwarded: bool) -> Self {
        Self {
            store,
            trust_forwarded,
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/signal", get(get_signals).post(post_signal))
        .route("/discovery", get(discovery))
        .route("/metrics", get(metrics_text))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Body of `POST /signal`. Every field is optional here so that missing ones map to a 400 rather
/// than the extractor's generic rejection.
#[derive(Debug, Deserialize)]
struct SignalSubmission {
    #[serde(rename = "type")]
    kind: Option<String>,
    from: Option<String>,
    to: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalQuery {
    pub peer_id: Option<String>,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "tincan-relay" }))
}

pub async fn post_signal(
    State(state): State<RelayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let submission: SignalSubmission = match serde_json::from_slice(&body) {
        Ok(submission) => submission,
        Err(err) => {
            debug!(target: "tincan::relay", error = %err, "rejecting unparseable envelope");
            return reject("malformed_body", "Invalid JSON body");
        }
    };

    let from = submission
        .from
        .map(|from| from.trim().to_string())
        .filter(|from| !from.is_empty());
    let (Some(raw_kind), Some(from)) = (submission.kind, from) else {
        return reject("missing_fields", "Missing required fields");
    };
    let Some(kind) = EnvelopeKind::parse(&raw_kind) else {
        return reject("unknown_type", "Unsupported envelope type");
    };

    let envelope = PostEnvelope {
        kind,
        from,
        to: submission.to.unwrap_or_default(),
        data: submission.data,
    };
    let target = if envelope.is_room_advert() {
        "discovery"
    } else {
        "peer"
    };

    let scope = request_scope(&state, connect_info.as_ref(), &headers);
    match state.store.append(&scope, envelope).await {
        Ok(stored) => {
            debug!(
                target: "tincan::relay",
                id = %stored.id,
                kind = stored.kind.as_str(),
                from = %stored.from,
                to = %stored.to,
                "envelope stored"
            );
            metrics::ENVELOPES_POSTED
                .with_label_values(&[kind.as_str(), target])
                .inc();
            (StatusCode::OK, Json(PostAck { success: true })).into_response()
        }
        Err(err) => {
            error!(target: "tincan::relay", error = %err, "failed to store envelope");
            metrics::POSTS_REJECTED.with_label_values(&["store"]).inc();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to store signal" })),
            )
                .into_response()
        }
    }
}

pub async fn get_signals(
    State(state): State<RelayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<SignalQuery>,
) -> Response {
    let scope = request_scope(&state, connect_info.as_ref(), &headers);
    metrics::SIGNAL_POLLS.inc();
    match collect_signals(state.store.as_ref(), &scope, query.peer_id.as_deref()).await {
        Ok(batch) => Json(batch).into_response(),
        Err(err) => {
            error!(target: "tincan::relay", error = %err, "failed to read envelopes");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to read signals" })),
            )
                .into_response()
        }
    }
}

pub async fn discovery(
    State(state): State<RelayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Json<DiscoveryKey> {
    metrics::DISCOVERY_LOOKUPS.inc();
    Json(DiscoveryKey {
        discovery_key: request_scope(&state, connect_info.as_ref(), &headers),
    })
}

pub async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

fn reject(reason: &'static str, message: &'static str) -> Response {
    warn!(target: "tincan::relay", reason, "rejected envelope submission");
    metrics::POSTS_REJECTED.with_label_values(&[reason]).inc();
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// Network scope of the caller: its forwarded client address when the relay trusts the proxy in
/// front of it, else the socket peer address.
fn request_scope(
    state: &RelayState,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
) -> String {
    let forwarded = state
        .trust_forwarded
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(forwarded_client)
        .map(str::to_string);
    let address = forwarded
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    scope_key(&address)
}
