use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{EventSink, PeerTransport, Role, TransportError, TransportEvent, TransportFactory};

const DATA_CHANNEL_LABEL: &str = "tincan";

/// WebRTC data-channel transport.
///
/// Signaling is non-trickle: a description is only emitted once ICE gathering has finished, so it
/// already carries every candidate and one offer/answer pair through the relay is enough.
#[derive(Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(stun_servers: &[String]) -> Self {
        let ice_servers = if stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: stun_servers.to_vec(),
                ..Default::default()
            }]
        };
        Self { ice_servers }
    }
}

impl TransportFactory for WebRtcTransportFactory {
    fn create(&self, role: Role, events: EventSink) -> Result<Box<dyn PeerTransport>, TransportError> {
        let (commands, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let driver = Driver {
            role,
            ice_servers: self.ice_servers.clone(),
            events,
            open: open.clone(),
            channel: Arc::new(Mutex::new(None)),
        };
        tokio::spawn(driver.run(rx));
        Ok(Box::new(WebRtcTransport { commands, open }))
    }
}

enum DriverCommand {
    Remote(Value),
    Send(Bytes),
    Close,
}

struct WebRtcTransport {
    commands: mpsc::UnboundedSender<DriverCommand>,
    open: Arc<AtomicBool>,
}

impl PeerTransport for WebRtcTransport {
    fn signal(&self, description: Value) {
        let _ = self.commands.send(DriverCommand::Remote(description));
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        self.commands
            .send(DriverCommand::Send(payload))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        let _ = self.commands.send(DriverCommand::Close);
    }
}

/// Owns one peer connection for its whole life.
struct Driver {
    role: Role,
    ice_servers: Vec<RTCIceServer>,
    events: EventSink,
    open: Arc<AtomicBool>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl Driver {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<DriverCommand>) {
        let peer = self.events.peer_id().to_string();
        let connection = match self.setup().await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(target: "tincan::transport", peer = %peer, error = %err, "webrtc setup failed");
                self.events.emit(TransportEvent::Error(err.to_string()));
                return;
            }
        };

        while let Some(command) = commands.recv().await {
            match command {
                DriverCommand::Remote(description) => {
                    if let Err(err) = self.apply_remote(&connection, description).await {
                        warn!(target: "tincan::transport", peer = %peer, error = %err, "remote description rejected");
                        self.events.emit(TransportEvent::Error(err.to_string()));
                    }
                }
                DriverCommand::Send(payload) => {
                    let channel = self.channel.lock().clone();
                    match channel {
                        Some(channel) => {
                            if let Err(err) = channel.send(&payload).await {
                                warn!(target: "tincan::transport", peer = %peer, error = %err, "data channel send failed");
                            }
                        }
                        None => trace!(target: "tincan::transport", peer = %peer, "dropping payload; no data channel yet"),
                    }
                }
                DriverCommand::Close => break,
            }
        }

        self.open.store(false, Ordering::Release);
        if let Err(err) = connection.close().await {
            debug!(target: "tincan::transport", peer = %peer, error = %err, "peer connection close failed");
        }
    }

    async fn setup(&self) -> Result<Arc<RTCPeerConnection>, TransportError> {
        let api = APIBuilder::new().build();
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let connection = Arc::new(api.new_peer_connection(config).await.map_err(setup_error)?);

        let events = self.events.clone();
        let open = self.open.clone();
        connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            let open = open.clone();
            Box::pin(async move {
                trace!(target: "tincan::transport", peer = %events.peer_id(), ?state, "peer connection state");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    open.store(false, Ordering::Release);
                    events.emit(TransportEvent::Closed);
                }
            })
        }));

        match self.role {
            Role::Initiator => {
                let channel = connection
                    .create_data_channel(DATA_CHANNEL_LABEL, None)
                    .await
                    .map_err(setup_error)?;
                wire_channel(channel, &self.channel, &self.events, &self.open);

                let offer = connection.create_offer(None).await.map_err(setup_error)?;
                self.publish_local(&connection, offer).await?;
            }
            Role::Responder => {
                let slot = self.channel.clone();
                let events = self.events.clone();
                let open = self.open.clone();
                connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                    wire_channel(channel, &slot, &events, &open);
                    Box::pin(async {})
                }));
            }
        }
        Ok(connection)
    }

    async fn apply_remote(
        &self,
        connection: &Arc<RTCPeerConnection>,
        description: Value,
    ) -> Result<(), TransportError> {
        let remote: RTCSessionDescription = serde_json::from_value(description)
            .map_err(|err| TransportError::InvalidDescription(err.to_string()))?;
        connection
            .set_remote_description(remote)
            .await
            .map_err(|err| TransportError::InvalidDescription(err.to_string()))?;

        if self.role == Role::Responder {
            let answer = connection.create_answer(None).await.map_err(setup_error)?;
            self.publish_local(connection, answer).await?;
        }
        Ok(())
    }

    async fn publish_local(
        &self,
        connection: &Arc<RTCPeerConnection>,
        description: RTCSessionDescription,
    ) -> Result<(), TransportError> {
        let mut gathered = connection.gathering_complete_promise().await;
        connection
            .set_local_description(description)
            .await
            .map_err(setup_error)?;
        let _ = gathered.recv().await;

        let local = connection
            .local_description()
            .await
            .ok_or_else(|| TransportError::Setup("no local description after gathering".into()))?;
        let value = serde_json::to_value(&local)
            .map_err(|err| TransportError::Setup(format!("description encode failed: {err}")))?;
        self.events.emit(TransportEvent::Signal(value));
        Ok(())
    }
}

fn wire_channel(
    channel: Arc<RTCDataChannel>,
    slot: &Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: &EventSink,
    open: &Arc<AtomicBool>,
) {
    let on_open_events = events.clone();
    let on_open_flag = open.clone();
    channel.on_open(Box::new(move || {
        on_open_flag.store(true, Ordering::Release);
        on_open_events.emit(TransportEvent::Connected);
        Box::pin(async {})
    }));

    let on_close_events = events.clone();
    let on_close_flag = open.clone();
    channel.on_close(Box::new(move || {
        on_close_flag.store(false, Ordering::Release);
        on_close_events.emit(TransportEvent::Closed);
        Box::pin(async {})
    }));

    let on_message_events = events.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        on_message_events.emit(TransportEvent::Data(message.data));
        Box::pin(async {})
    }));

    *slot.lock() = Some(channel);
}

fn setup_error(err: webrtc::Error) -> TransportError {
    TransportError::Setup(err.to_string())
}
