use bytes::Bytes;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::internal::media::MediaStreamHandle;
use crate::internal::transport::Transport;

/// assigned by the rendezvous service. stable for the session and used to address envelopes
pub type PeerIdentity = String;

/// identifies one transport allocation. a peer that hangs up and calls again gets a new one,
/// so late events from the old transport can't be mistaken for the new one
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// initiator: Idle -> Initiating -> AwaitingRemoteAnswer -> Connected -> Terminated
/// responder: Idle -> OfferReceived -> AnsweringLocally -> Connected -> Terminated
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Initiating,
    AwaitingRemoteAnswer,
    OfferReceived,
    AnsweringLocally,
    Connected,
    Terminated,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

/// an opaque handshake payload on its way between two peers. the payload is only interpreted
/// by the transport which produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingEnvelope {
    pub kind: SignalKind,
    pub from: PeerIdentity,
    pub to: PeerIdentity,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
    #[serde(default)]
    pub display_name: String,
}

/// one per remote peer under negotiation or connected
pub struct ConnectionRecord {
    pub peer: PeerIdentity,
    pub role: Role,
    pub state: ConnectionState,
    /// None until a transport is allocated (responders before accepting) and after termination
    pub connection: Option<ConnectionId>,
    pub display_name: String,
    pub remote_media_stream: Option<MediaStreamHandle>,
    /// the remote offer, held until the call is accepted
    pub(crate) pending_offer: Option<Bytes>,
    /// set once the remote answer was fed to the transport. a second answer is stale
    pub(crate) answer_applied: bool,
    transport: Option<Arc<dyn Transport>>,
}

impl ConnectionRecord {
    pub(crate) fn initiator(peer: PeerIdentity) -> Self {
        Self {
            peer,
            role: Role::Initiator,
            state: ConnectionState::Idle,
            connection: None,
            display_name: String::new(),
            remote_media_stream: None,
            pending_offer: None,
            answer_applied: false,
            transport: None,
        }
    }

    pub(crate) fn responder(peer: PeerIdentity, display_name: String, offer: Bytes) -> Self {
        Self {
            peer,
            role: Role::Responder,
            state: ConnectionState::OfferReceived,
            connection: None,
            display_name,
            remote_media_stream: None,
            pending_offer: Some(offer),
            answer_applied: false,
            transport: None,
        }
    }

    pub(crate) fn attach(&mut self, connection: ConnectionId, transport: Arc<dyn Transport>) {
        self.connection = Some(connection);
        self.transport = Some(transport);
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ConnectionState::Terminated
    }

    /// moves the record to Terminated and releases the transport.
    /// returns false if the record was already terminated, in which case nothing is released
    pub async fn terminate(&mut self) -> bool {
        if self.is_terminated() {
            return false;
        }
        log::info!("terminating {} call with {} from state {}", self.role, self.peer, self.state);
        self.state = ConnectionState::Terminated;
        self.pending_offer = None;
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                log::error!("failed to close transport for peer {}: {}", &self.peer, e);
            }
        }
        true
    }
}

/// serializes the opaque payload as base64 text so envelopes stay valid JSON
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_json_uses_base64_payload() {
        let envelope = SignalingEnvelope {
            kind: SignalKind::Offer,
            from: "A1".into(),
            to: "B123".into(),
            payload: Bytes::from_static(b"v=0"),
            display_name: "alice".into(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "offer");
        assert_eq!(json["payload"], "dj0w");
        assert_eq!(json["displayName"], "alice");

        let back: SignalingEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn envelope_without_display_name_defaults_to_empty() {
        let json = r#"{"kind":"answer","from":"B123","to":"A1","payload":""}"#;
        let envelope: SignalingEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.kind, SignalKind::Answer);
        assert!(envelope.display_name.is_empty());
        assert!(envelope.payload.is_empty());
    }

    #[tokio::test]
    async fn pending_record_terminates_without_transport() {
        let mut record =
            ConnectionRecord::responder("A1".into(), "alice".into(), Bytes::from_static(b"offer"));
        assert!(record.terminate().await);
        assert!(record.is_terminated());
        assert!(record.pending_offer.is_none());
        assert!(!record.terminate().await);
    }
}
