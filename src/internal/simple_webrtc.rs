use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::SessionConfig;
use crate::internal::data_types::{ConnectionId, Role};
use crate::internal::events::{TransportEvent, TransportEventKind};
use crate::internal::media::{MediaStreamHandle, MimeType};
use crate::internal::transport::{Transport, TransportFactory};

/// webrtc-rs backed transports.
///
/// Signaling is not trickled: the opaque payload is the JSON encoded session description,
/// produced after ICE gathering finished, so one offer and one answer complete the handshake.
/// The initiator creates the data channel and the responder adopts it. The transport reports
/// Connected once the data channel is open.
pub struct WebRtcTransportFactory {
    api: webrtc::api::API,
    config: SessionConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self {
            api: create_api()?,
            config,
        })
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        connection: ConnectionId,
        role: Role,
        local_media: Option<MediaStreamHandle>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn Transport>> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        // Create a new RTCPeerConnection
        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);
        if let Some(media) = &local_media {
            for track in media.local_tracks() {
                peer_connection
                    .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                    .await?;
            }
        }

        let transport = Arc::new(WebRtcTransport {
            connection,
            role,
            peer_connection: peer_connection.clone(),
            data_channel: Arc::new(Mutex::new(None)),
            events: events.clone(),
            closed: AtomicBool::new(false),
        });
        transport.register_callbacks();

        if role == Role::Initiator {
            // offer to receive whatever we don't send, so the responder can attach its media
            let sent: Vec<RTPCodecType> = local_media
                .iter()
                .flat_map(|m| m.local_tracks())
                .map(|t| t.kind())
                .collect();
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                if !sent.contains(&kind) {
                    peer_connection
                        .add_transceiver_from_kind(
                            kind,
                            &[RTCRtpTransceiverInit {
                                direction: RTCRtpTransceiverDirection::Recvonly,
                                send_encodings: vec![],
                            }],
                        )
                        .await?;
                }
            }

            let data_channel = peer_connection
                .create_data_channel(&self.config.data_channel_label, None)
                .await?;
            adopt_data_channel(
                data_channel,
                transport.data_channel.clone(),
                connection,
                events.clone(),
            )
            .await;
            spawn_local_description(peer_connection, role, connection, events);
        }

        Ok(transport)
    }
}

pub struct WebRtcTransport {
    connection: ConnectionId,
    role: Role,
    peer_connection: Arc<RTCPeerConnection>,
    /// set by the initiator right away, by the responder once the remote channel shows up
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    fn register_callbacks(&self) {
        // the next 2 lines is some nonsense to satisfy the (otherwise excellent) rust compiler
        let tx = self.events.clone();
        let connection = self.connection;
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                log::info!("Connection State for {} has changed {}", connection, state);
                let kind = match state {
                    RTCPeerConnectionState::Failed => {
                        Some(TransportEventKind::Failed("peer connection failed".into()))
                    }
                    RTCPeerConnectionState::Closed => Some(TransportEventKind::Closed),
                    _ => None,
                };
                if let Some(kind) = kind {
                    emit(&tx, connection, kind);
                }
                Box::pin(async {})
            }));

        // the responder learns about the data channel from the remote side
        let tx = self.events.clone();
        let slot = self.data_channel.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |data_channel: Arc<RTCDataChannel>| {
                let tx = tx.clone();
                let slot = slot.clone();
                Box::pin(async move {
                    adopt_data_channel(data_channel, slot, connection, tx).await;
                })
            }));

        // group remote tracks by stream. each stream is reported once, later tracks join it
        let tx = self.events.clone();
        let streams: Arc<Mutex<HashMap<String, MediaStreamHandle>>> =
            Arc::new(Mutex::new(HashMap::new()));
        self.peer_connection.on_track(Box::new(
            move |track: Option<Arc<TrackRemote>>, _receiver: Option<Arc<RTCRtpReceiver>>| {
                let tx = tx.clone();
                let streams = streams.clone();
                Box::pin(async move {
                    let Some(track) = track else {
                        return;
                    };
                    let mime_type = track.codec().await.capability.mime_type;
                    match MimeType::from_string(&mime_type) {
                        Ok(m) => log::debug!("remote track on {} with codec {}", connection, m),
                        Err(e) => log::warn!("remote track on {}: {}", connection, e),
                    }
                    let stream_id = track.stream_id().await;
                    let mut streams = streams.lock().await;
                    if let Some(stream) = streams.get(&stream_id) {
                        stream.add_remote_track(track);
                        return;
                    }
                    let stream = MediaStreamHandle::new(stream_id.clone());
                    stream.add_remote_track(track);
                    streams.insert(stream_id, stream.clone());
                    emit(&tx, connection, TransportEventKind::RemoteStream(stream));
                })
            },
        ));
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn signal(&self, payload: Bytes) -> Result<()> {
        let sdp: RTCSessionDescription = serde_json::from_slice(&payload)?;
        if let Err(e) = self.peer_connection.set_remote_description(sdp).await {
            log::error!("failed to set remote description: {:?}", e);
            return Err(e.into());
        }
        if self.role == Role::Responder {
            spawn_local_description(
                self.peer_connection.clone(),
                self.role,
                self.connection,
                self.events.clone(),
            );
        }
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let data_channel = self.data_channel.lock().await.clone();
        let Some(data_channel) = data_channel else {
            bail!("data channel is not open");
        };
        // browsers put draw events on the channel as text messages
        match std::str::from_utf8(&data) {
            Ok(text) => data_channel.send_text(text.to_string()).await?,
            Err(_) => data_channel.send(&data).await?,
        };
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            log::warn!("transport {} closed twice", self.connection);
            return Ok(());
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

fn emit(
    tx: &mpsc::UnboundedSender<TransportEvent>,
    connection: ConnectionId,
    kind: TransportEventKind,
) {
    if let Err(e) = tx.send(TransportEvent::new(connection, kind)) {
        log::error!("failed to send transport event for {}: {}", connection, e);
    }
}

async fn adopt_data_channel(
    data_channel: Arc<RTCDataChannel>,
    slot: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    log::debug!(
        "data channel {} ({}) on {}",
        data_channel.label(),
        data_channel.id(),
        connection
    );

    // on_open fires right away for a channel which is already open, so send must work by then
    if slot.lock().await.replace(data_channel.clone()).is_some() {
        log::warn!("replacing data channel on {}", connection);
    }

    let open_tx = tx.clone();
    data_channel.on_open(Box::new(move || {
        emit(&open_tx, connection, TransportEventKind::Connected);
        Box::pin(async {})
    }));

    let message_tx = tx.clone();
    data_channel.on_message(Box::new(move |msg: DataChannelMessage| {
        emit(&message_tx, connection, TransportEventKind::Data(msg.data));
        Box::pin(async {})
    }));

    data_channel.on_close(Box::new(move || {
        emit(&tx, connection, TransportEventKind::Closed);
        Box::pin(async {})
    }));
}

/// ICE gathering can take seconds, so the description is produced off the caller's task and
/// reported as a LocalSignal
fn spawn_local_description(
    peer_connection: Arc<RTCPeerConnection>,
    role: Role,
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    tokio::spawn(async move {
        let kind = match gather_local_description(&peer_connection, role).await {
            Ok(payload) => TransportEventKind::LocalSignal(payload),
            Err(e) => {
                log::error!("failed to create local description for {}: {}", connection, e);
                TransportEventKind::Failed(e.to_string())
            }
        };
        emit(&tx, connection, kind);
    });
}

async fn gather_local_description(
    peer_connection: &RTCPeerConnection,
    role: Role,
) -> Result<Bytes> {
    let description = match role {
        Role::Initiator => peer_connection.create_offer(None).await?,
        Role::Responder => peer_connection.create_answer(None).await?,
    };
    let mut gathering_complete = peer_connection.gathering_complete_promise().await;
    // Sets the LocalDescription, and starts our UDP listeners
    // Note: this will start the gathering of ICE candidates
    peer_connection.set_local_description(description).await?;
    let _ = gathering_complete.recv().await;

    let Some(local) = peer_connection.local_description().await else {
        bail!("no local description after ICE gathering");
    };
    Ok(Bytes::from(serde_json::to_vec(&local)?))
}

// todo: add support for more codecs. perhaps make it configurable
fn create_api() -> Result<webrtc::api::API> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;

    // Create a InterceptorRegistry. This is the user configurable RTP/RTCP Pipeline.
    // This provides NACKs, RTCP Reports and other features. If you use `webrtc.NewPeerConnection`
    // this is enabled by default. If you are manually managing You MUST create a InterceptorRegistry
    // for each PeerConnection.
    let mut registry = Registry::new();

    // Use the default set of Interceptors
    registry = register_default_interceptors(registry, &mut media)?;

    // Create the API object with the MediaEngine
    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}
