use bytes::Bytes;

use crate::internal::data_types::{ConnectionId, PeerIdentity, SignalingEnvelope};
use crate::internal::media::MediaStreamHandle;

/// reported by a transport on the session's transport channel
#[derive(Debug)]
pub struct TransportEvent {
    pub connection: ConnectionId,
    pub kind: TransportEventKind,
}

#[derive(Debug)]
pub enum TransportEventKind {
    /// a handshake payload to forward to the remote peer (offer for initiators, answer for responders)
    LocalSignal(Bytes),
    /// the data channel is usable
    Connected,
    /// one data channel message
    Data(Bytes),
    /// the remote side started sending media. reported once per remote stream
    RemoteStream(MediaStreamHandle),
    /// the remote side went away
    Closed,
    /// unrecoverable transport error
    Failed(String),
}

impl TransportEvent {
    pub fn new(connection: ConnectionId, kind: TransportEventKind) -> Self {
        Self { connection, kind }
    }
}

/// delivered by a rendezvous client, in network arrival order
#[derive(Debug)]
pub enum RendezvousEvent {
    /// once per relay connection
    IdentityAssigned(PeerIdentity),
    Envelope(SignalingEnvelope),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// hang_up was called locally
    HungUp,
    /// the remote side closed the connection
    RemoteClosed,
    TransportFailure(String),
}

/// emitted to the controlling application
#[derive(Debug)]
pub enum EmittedEvents {
    IdentityAssigned { identity: PeerIdentity },
    /// an offer is waiting for accept or decline
    IncomingCall {
        from: PeerIdentity,
        display_name: String,
    },
    CallConnected { peer: PeerIdentity },
    /// surfaced once per stream, for the rendering collaborator
    RemoteStream {
        peer: PeerIdentity,
        stream: MediaStreamHandle,
    },
    CallEnded { peer: PeerIdentity, reason: EndReason },
    /// a Command passed to Session::run was rejected
    CommandFailed { error: String },
}

/// UI intents, for applications which drive the session through Session::run
#[derive(Debug)]
pub enum Command {
    Call {
        target: PeerIdentity,
        media: Option<MediaStreamHandle>,
    },
    Accept {
        from: PeerIdentity,
        media: Option<MediaStreamHandle>,
    },
    Decline { from: PeerIdentity },
    HangUp { peer: PeerIdentity },
    PointerDown { x: f64, y: f64 },
    PointerMove { x: f64, y: f64 },
    PointerUp,
    Shutdown,
}
