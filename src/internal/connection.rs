//! Per-peer call signaling state machine.
//!
//! Drives one `ConnectionRecord` per remote identity from the first offer to a live transport:
//!
//! ```text
//! initiator: Idle -> Initiating -> AwaitingRemoteAnswer -> Connected -> Terminated
//! responder: Idle -> OfferReceived -> AnsweringLocally -> Connected -> Terminated
//! ```
//!
//! Any state may jump to Terminated. Signals which arrive in the wrong state come back as
//! `Error::StaleSignal`, because the relay may deliver them late or twice.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::internal::data_types::*;
use crate::internal::error::Error;
use crate::internal::events::TransportEvent;
use crate::internal::media::MediaStreamHandle;
use crate::internal::rendezvous::Rendezvous;
use crate::internal::transport::TransportFactory;

pub struct CallManager {
    identity: Option<PeerIdentity>,
    display_name: String,
    records: HashMap<PeerIdentity, ConnectionRecord>,
    transports: Arc<dyn TransportFactory>,
    rendezvous: Arc<dyn Rendezvous>,
    /// cloned into every transport
    transport_events: mpsc::UnboundedSender<TransportEvent>,
}

impl CallManager {
    pub fn new(
        display_name: String,
        transports: Arc<dyn TransportFactory>,
        rendezvous: Arc<dyn Rendezvous>,
        transport_events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            identity: None,
            display_name,
            records: HashMap::new(),
            transports,
            rendezvous,
            transport_events,
        }
    }

    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.identity.as_ref()
    }

    /// returns false if an identity was already assigned. the first one stays
    pub fn set_identity(&mut self, identity: PeerIdentity) -> bool {
        if let Some(current) = &self.identity {
            log::warn!(
                "ignoring identity {} - already identified as {}",
                identity,
                current
            );
            return false;
        }
        log::info!("identity assigned: {}", &identity);
        self.identity = Some(identity);
        true
    }

    pub fn record(&self, peer: &str) -> Option<&ConnectionRecord> {
        self.records.get(peer)
    }

    pub fn state_of(&self, peer: &str) -> Option<ConnectionState> {
        self.records.get(peer).map(|r| r.state)
    }

    pub fn peers(&self) -> Vec<PeerIdentity> {
        self.records.keys().cloned().collect()
    }

    pub fn peer_for(&self, connection: ConnectionId) -> Option<&PeerIdentity> {
        self.records
            .values()
            .find(|r| r.connection == Some(connection))
            .map(|r| &r.peer)
    }

    /// allocates an initiator transport. the offer is sent once the transport reports it
    pub async fn initiate_call(
        &mut self,
        target: &str,
        local_media: Option<MediaStreamHandle>,
    ) -> Result<ConnectionId, Error> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::InvalidTarget(target.to_string()));
        }
        let Some(identity) = &self.identity else {
            return Err(Error::IdentityUnassigned);
        };
        if identity == target {
            return Err(Error::InvalidTarget(target.to_string()));
        }
        if self.records.contains_key(target) {
            return Err(Error::CallInProgress(target.to_string()));
        }

        let mut record = ConnectionRecord::initiator(target.to_string());
        let connection = ConnectionId::new();
        let transport = self
            .transports
            .create(
                connection,
                Role::Initiator,
                local_media,
                self.transport_events.clone(),
            )
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;
        record.attach(connection, transport);
        record.state = ConnectionState::Initiating;
        log::info!("calling {} on connection {}", target, connection);
        self.records.insert(target.to_string(), record);
        Ok(connection)
    }

    /// Stores the offer without allocating anything, so unanswered calls cost nothing. A newer
    /// offer from a peer whose call is still pending replaces the stored one.
    pub fn handle_incoming_offer(&mut self, envelope: SignalingEnvelope) -> Result<(), Error> {
        if envelope.kind != SignalKind::Offer {
            return Err(Error::stale(&envelope.from, "expected an offer"));
        }
        if let Some(existing) = self.records.get(&envelope.from) {
            if existing.state != ConnectionState::OfferReceived {
                return Err(Error::stale(
                    &envelope.from,
                    format!("offer while {}", existing.state),
                ));
            }
            log::debug!("replacing pending offer from {}", &envelope.from);
        }
        log::info!(
            "incoming call from {} ({})",
            &envelope.from,
            &envelope.display_name
        );
        let record = ConnectionRecord::responder(
            envelope.from.clone(),
            envelope.display_name,
            envelope.payload,
        );
        self.records.insert(envelope.from, record);
        Ok(())
    }

    /// allocates a responder transport and feeds it the stored offer
    pub async fn accept_call(
        &mut self,
        from: &str,
        local_media: Option<MediaStreamHandle>,
    ) -> Result<ConnectionId, Error> {
        // the answer can't be addressed without it. the offer stays pending
        if self.identity.is_none() {
            return Err(Error::IdentityUnassigned);
        }
        let offer = match self.records.get_mut(from) {
            Some(r) if r.state == ConnectionState::OfferReceived => r.pending_offer.take(),
            _ => None,
        };
        let Some(offer) = offer else {
            return Err(Error::NoPendingCall(from.to_string()));
        };

        let connection = ConnectionId::new();
        let created = self
            .transports
            .create(
                connection,
                Role::Responder,
                local_media,
                self.transport_events.clone(),
            )
            .await;
        let transport = match created {
            Ok(t) => t,
            Err(e) => {
                self.discard(from).await;
                return Err(Error::TransportFailure(e.to_string()));
            }
        };
        if let Some(record) = self.records.get_mut(from) {
            record.attach(connection, transport.clone());
            record.state = ConnectionState::AnsweringLocally;
        }
        if let Err(e) = transport.signal(offer).await {
            self.discard(from).await;
            return Err(Error::TransportFailure(e.to_string()));
        }
        log::info!("answering {} on connection {}", from, connection);
        Ok(connection)
    }

    /// drops a pending offer. returns false if there was none
    pub fn decline_call(&mut self, from: &str) -> bool {
        match self.records.get(from) {
            Some(r) if r.state == ConnectionState::OfferReceived => {
                log::info!("declined call from {}", from);
                self.records.remove(from);
                true
            }
            _ => false,
        }
    }

    /// only valid while AwaitingRemoteAnswer, and only once
    pub async fn on_remote_answer(&mut self, envelope: SignalingEnvelope) -> Result<(), Error> {
        let Some(record) = self.records.get_mut(&envelope.from) else {
            return Err(Error::stale(&envelope.from, "answer for unknown call"));
        };
        if envelope.kind != SignalKind::Answer
            || record.state != ConnectionState::AwaitingRemoteAnswer
            || record.answer_applied
        {
            return Err(Error::stale(
                &envelope.from,
                format!("{} while {}", envelope.kind, record.state),
            ));
        }
        let Some(transport) = record.transport().cloned() else {
            return Err(Error::stale(&envelope.from, "no transport"));
        };
        record.answer_applied = true;
        if let Err(e) = transport.signal(envelope.payload).await {
            self.discard(&envelope.from).await;
            return Err(Error::TransportFailure(e.to_string()));
        }
        Ok(())
    }

    /// Forwards a handshake payload reported by a transport. Initiators send an Offer and move to
    /// AwaitingRemoteAnswer; responders send an Answer. Only the first payload is forwarded.
    pub async fn on_local_signal(
        &mut self,
        connection: ConnectionId,
        payload: Bytes,
    ) -> Result<(), Error> {
        let Some(from) = self.identity.clone() else {
            return Err(Error::IdentityUnassigned);
        };
        let display_name = self.display_name.clone();
        let Some(record) = self.record_by_connection(connection) else {
            return Err(Error::stale(
                &connection.to_string(),
                "local signal from released transport",
            ));
        };
        let kind = match (record.role, record.state) {
            (Role::Initiator, ConnectionState::Initiating) => {
                record.state = ConnectionState::AwaitingRemoteAnswer;
                SignalKind::Offer
            }
            (Role::Responder, ConnectionState::AnsweringLocally) if !record.answer_applied => {
                record.answer_applied = true;
                SignalKind::Answer
            }
            (role, state) => {
                return Err(Error::stale(
                    &record.peer,
                    format!("local signal for {} while {}", role, state),
                ))
            }
        };
        let envelope = SignalingEnvelope {
            kind,
            from,
            to: record.peer.clone(),
            payload,
            display_name,
        };
        log::debug!("sending {} to {}", kind, &envelope.to);
        self.rendezvous
            .send(envelope)
            .await
            .map_err(|e| Error::Rendezvous(e.to_string()))
    }

    /// the transport is usable. returns the record so it can be registered
    pub fn on_connected(&mut self, connection: ConnectionId) -> Result<&ConnectionRecord, Error> {
        let Some(record) = self.record_by_connection(connection) else {
            return Err(Error::stale(
                &connection.to_string(),
                "connected event from released transport",
            ));
        };
        match record.state {
            ConnectionState::AwaitingRemoteAnswer | ConnectionState::AnsweringLocally => {
                record.state = ConnectionState::Connected;
                log::info!("connected to {} as {}", &record.peer, record.role);
                Ok(record)
            }
            state => Err(Error::stale(
                &record.peer,
                format!("connected event while {}", state),
            )),
        }
    }

    /// stores the first remote stream of a connection. later streams are ignored
    pub fn on_remote_stream(
        &mut self,
        connection: ConnectionId,
        stream: MediaStreamHandle,
    ) -> Option<PeerIdentity> {
        let record = self.record_by_connection(connection)?;
        if record.remote_media_stream.is_some() {
            log::debug!(
                "ignoring additional stream {} from {}",
                stream.id(),
                &record.peer
            );
            return None;
        }
        log::info!("remote stream {} from {}", stream.id(), &record.peer);
        record.remote_media_stream = Some(stream);
        Some(record.peer.clone())
    }

    /// the transport closed or failed. terminates and removes the record it belongs to
    pub async fn on_transport_ended(
        &mut self,
        connection: ConnectionId,
    ) -> Option<ConnectionRecord> {
        let peer = self.peer_for(connection)?.clone();
        self.discard(&peer).await
    }

    /// Releases the transport and removes the record. Safe from any state; hanging up a peer
    /// with no record is a no-op.
    pub async fn hang_up(&mut self, peer: &str) -> Option<ConnectionRecord> {
        self.discard(peer).await
    }

    pub async fn hang_up_all(&mut self) -> Vec<ConnectionRecord> {
        let mut ended = Vec::new();
        for peer in self.peers() {
            if let Some(record) = self.discard(&peer).await {
                ended.push(record);
            }
        }
        ended
    }

    async fn discard(&mut self, peer: &str) -> Option<ConnectionRecord> {
        let mut record = self.records.remove(peer)?;
        record.terminate().await;
        Some(record)
    }

    fn record_by_connection(&mut self, connection: ConnectionId) -> Option<&mut ConnectionRecord> {
        self.records
            .values_mut()
            .find(|r| r.connection == Some(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::registry::tests::RecordingTransport;
    use crate::internal::transport::Transport;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeFactory {
        created: Mutex<Vec<(ConnectionId, Role, Arc<RecordingTransport>)>>,
        fail: bool,
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn create(
            &self,
            connection: ConnectionId,
            role: Role,
            _local_media: Option<MediaStreamHandle>,
            _events: mpsc::UnboundedSender<TransportEvent>,
        ) -> Result<Arc<dyn Transport>> {
            if self.fail {
                bail!("no ICE servers reachable");
            }
            let transport = Arc::new(RecordingTransport::default());
            self.created
                .lock()
                .await
                .push((connection, role, transport.clone()));
            Ok(transport)
        }
    }

    #[derive(Default)]
    struct FakeRendezvous {
        sent: Mutex<Vec<SignalingEnvelope>>,
    }

    #[async_trait]
    impl Rendezvous for FakeRendezvous {
        async fn send(&self, envelope: SignalingEnvelope) -> Result<()> {
            self.sent.lock().await.push(envelope);
            Ok(())
        }
    }

    struct Fixture {
        calls: CallManager,
        factory: Arc<FakeFactory>,
        rendezvous: Arc<FakeRendezvous>,
    }

    fn fixture() -> Fixture {
        fixture_with(FakeFactory::default())
    }

    fn fixture_with(factory: FakeFactory) -> Fixture {
        let factory = Arc::new(factory);
        let rendezvous = Arc::new(FakeRendezvous::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut calls = CallManager::new("alice".into(), factory.clone(), rendezvous.clone(), tx);
        calls.set_identity("A1".into());
        Fixture {
            calls,
            factory,
            rendezvous,
        }
    }

    fn envelope(kind: SignalKind, from: &str, payload: &'static [u8]) -> SignalingEnvelope {
        SignalingEnvelope {
            kind,
            from: from.into(),
            to: "A1".into(),
            payload: Bytes::from_static(payload),
            display_name: "bob".into(),
        }
    }

    async fn transport(f: &Fixture, index: usize) -> Arc<RecordingTransport> {
        f.factory.created.lock().await[index].2.clone()
    }

    #[tokio::test]
    async fn initiator_path_reaches_connected() {
        let mut f = fixture();
        let conn = f.calls.initiate_call("B123", None).await.unwrap();
        assert_eq!(f.calls.state_of("B123"), Some(ConnectionState::Initiating));
        assert_eq!(f.factory.created.lock().await[0].1, Role::Initiator);

        f.calls
            .on_local_signal(conn, Bytes::from_static(b"offer-sdp"))
            .await
            .unwrap();
        assert_eq!(
            f.calls.state_of("B123"),
            Some(ConnectionState::AwaitingRemoteAnswer)
        );
        {
            let sent = f.rendezvous.sent.lock().await;
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].kind, SignalKind::Offer);
            assert_eq!(sent[0].to, "B123");
            assert_eq!(sent[0].from, "A1");
            assert_eq!(sent[0].display_name, "alice");
            assert_eq!(sent[0].payload, Bytes::from_static(b"offer-sdp"));
        }

        f.calls
            .on_remote_answer(envelope(SignalKind::Answer, "B123", b"answer-sdp"))
            .await
            .unwrap();
        assert_eq!(
            *transport(&f, 0).await.signals.lock().await,
            vec![Bytes::from_static(b"answer-sdp")]
        );

        let record = f.calls.on_connected(conn).unwrap();
        assert_eq!(record.state, ConnectionState::Connected);
        assert_eq!(record.role, Role::Initiator);
    }

    #[tokio::test]
    async fn responder_path_reaches_connected() {
        let mut f = fixture();
        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "B123", b"offer-sdp"))
            .unwrap();
        assert_eq!(f.calls.state_of("B123"), Some(ConnectionState::OfferReceived));
        assert!(f.factory.created.lock().await.is_empty());
        assert_eq!(f.calls.record("B123").unwrap().display_name, "bob");

        let conn = f.calls.accept_call("B123", None).await.unwrap();
        assert_eq!(
            f.calls.state_of("B123"),
            Some(ConnectionState::AnsweringLocally)
        );
        assert_eq!(
            *transport(&f, 0).await.signals.lock().await,
            vec![Bytes::from_static(b"offer-sdp")]
        );

        f.calls
            .on_local_signal(conn, Bytes::from_static(b"answer-sdp"))
            .await
            .unwrap();
        {
            let sent = f.rendezvous.sent.lock().await;
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].kind, SignalKind::Answer);
            assert_eq!(sent[0].to, "B123");
        }

        assert_eq!(
            f.calls.on_connected(conn).unwrap().state,
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn rejects_invalid_targets() {
        let mut f = fixture();
        assert!(matches!(
            f.calls.initiate_call("", None).await,
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            f.calls.initiate_call("   ", None).await,
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            f.calls.initiate_call("A1", None).await,
            Err(Error::InvalidTarget(_))
        ));
        assert!(f.factory.created.lock().await.is_empty());

        f.calls.initiate_call("B123", None).await.unwrap();
        assert!(matches!(
            f.calls.initiate_call("B123", None).await,
            Err(Error::CallInProgress(_))
        ));
    }

    #[tokio::test]
    async fn calling_requires_identity() {
        let factory = Arc::new(FakeFactory::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut calls = CallManager::new(
            String::new(),
            factory,
            Arc::new(FakeRendezvous::default()),
            tx,
        );
        assert!(matches!(
            calls.initiate_call("B123", None).await,
            Err(Error::IdentityUnassigned)
        ));
    }

    #[tokio::test]
    async fn accepting_requires_identity() {
        let factory = Arc::new(FakeFactory::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut calls = CallManager::new(
            String::new(),
            factory.clone(),
            Arc::new(FakeRendezvous::default()),
            tx,
        );
        calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "B123", b"offer-sdp"))
            .unwrap();
        assert!(matches!(
            calls.accept_call("B123", None).await,
            Err(Error::IdentityUnassigned)
        ));
        assert_eq!(calls.state_of("B123"), Some(ConnectionState::OfferReceived));
        assert!(factory.created.lock().await.is_empty());

        // once identified the same offer can still be accepted
        calls.set_identity("A1".into());
        calls.accept_call("B123", None).await.unwrap();
        assert_eq!(
            calls.state_of("B123"),
            Some(ConnectionState::AnsweringLocally)
        );
    }

    #[tokio::test]
    async fn late_answers_are_stale_and_change_nothing() {
        let mut f = fixture();
        let conn = f.calls.initiate_call("B123", None).await.unwrap();

        // before the offer went out
        let err = f
            .calls
            .on_remote_answer(envelope(SignalKind::Answer, "B123", b"early"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleSignal { .. }));

        f.calls.on_local_signal(conn, Bytes::new()).await.unwrap();
        f.calls
            .on_remote_answer(envelope(SignalKind::Answer, "B123", b"first"))
            .await
            .unwrap();
        // duplicate before the transport confirmed
        assert!(f
            .calls
            .on_remote_answer(envelope(SignalKind::Answer, "B123", b"dup"))
            .await
            .is_err());

        f.calls.on_connected(conn).unwrap();
        let err = f
            .calls
            .on_remote_answer(envelope(SignalKind::Answer, "B123", b"late"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleSignal { .. }));
        assert_eq!(f.calls.state_of("B123"), Some(ConnectionState::Connected));
        assert_eq!(
            *transport(&f, 0).await.signals.lock().await,
            vec![Bytes::from_static(b"first")]
        );

        f.calls.hang_up("B123").await.unwrap();
        assert!(f
            .calls
            .on_remote_answer(envelope(SignalKind::Answer, "B123", b"after"))
            .await
            .is_err());
        assert_eq!(f.calls.state_of("B123"), None);
    }

    #[tokio::test]
    async fn hang_up_releases_transport_once() {
        let mut f = fixture();
        let conn = f.calls.initiate_call("B123", None).await.unwrap();
        f.calls.on_local_signal(conn, Bytes::new()).await.unwrap();

        let record = f.calls.hang_up("B123").await.unwrap();
        assert_eq!(record.state, ConnectionState::Terminated);
        assert!(record.transport().is_none());
        assert!(f.calls.hang_up("B123").await.is_none());
        assert_eq!(transport(&f, 0).await.closes.load(Ordering::SeqCst), 1);

        // the released transport can't move anything anymore
        assert!(f.calls.on_connected(conn).is_err());
        assert!(f.calls.on_transport_ended(conn).await.is_none());
    }

    #[tokio::test]
    async fn hang_up_from_every_state_terminates() {
        let mut f = fixture();

        f.calls.initiate_call("initiating", None).await.unwrap();

        let conn = f.calls.initiate_call("awaiting", None).await.unwrap();
        f.calls.on_local_signal(conn, Bytes::new()).await.unwrap();

        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "offered", b"o"))
            .unwrap();

        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "answering", b"o"))
            .unwrap();
        f.calls.accept_call("answering", None).await.unwrap();

        let conn = f.calls.initiate_call("connected", None).await.unwrap();
        f.calls.on_local_signal(conn, Bytes::new()).await.unwrap();
        f.calls
            .on_remote_answer(envelope(SignalKind::Answer, "connected", b"a"))
            .await
            .unwrap();
        f.calls.on_connected(conn).unwrap();

        let ended = f.calls.hang_up_all().await;
        assert_eq!(ended.len(), 5);
        assert!(ended.iter().all(|r| r.state == ConnectionState::Terminated));
        assert!(f.calls.peers().is_empty());
        for (_, _, t) in f.factory.created.lock().await.iter() {
            assert_eq!(t.closes.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn offers_during_live_call_are_stale() {
        let mut f = fixture();
        f.calls.initiate_call("B123", None).await.unwrap();
        let err = f
            .calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "B123", b"glare"))
            .unwrap_err();
        assert!(matches!(err, Error::StaleSignal { .. }));
        assert_eq!(f.calls.state_of("B123"), Some(ConnectionState::Initiating));
    }

    #[tokio::test]
    async fn newer_pending_offer_replaces_older() {
        let mut f = fixture();
        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "B123", b"first"))
            .unwrap();
        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "B123", b"second"))
            .unwrap();
        f.calls.accept_call("B123", None).await.unwrap();
        assert_eq!(
            *transport(&f, 0).await.signals.lock().await,
            vec![Bytes::from_static(b"second")]
        );
    }

    #[tokio::test]
    async fn accept_and_decline_need_a_pending_offer() {
        let mut f = fixture();
        assert!(matches!(
            f.calls.accept_call("B123", None).await,
            Err(Error::NoPendingCall(_))
        ));
        assert!(!f.calls.decline_call("B123"));

        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "B123", b"o"))
            .unwrap();
        assert!(f.calls.decline_call("B123"));
        assert_eq!(f.calls.state_of("B123"), None);
        assert!(f.factory.created.lock().await.is_empty());

        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "C9", b"o"))
            .unwrap();
        f.calls.accept_call("C9", None).await.unwrap();
        assert!(matches!(
            f.calls.accept_call("C9", None).await,
            Err(Error::NoPendingCall(_))
        ));
        assert!(!f.calls.decline_call("C9"));
    }

    #[tokio::test]
    async fn failed_transport_creation_discards_pending_call() {
        let mut f = fixture_with(FakeFactory {
            fail: true,
            ..Default::default()
        });
        f.calls
            .handle_incoming_offer(envelope(SignalKind::Offer, "B123", b"o"))
            .unwrap();
        assert!(matches!(
            f.calls.accept_call("B123", None).await,
            Err(Error::TransportFailure(_))
        ));
        assert_eq!(f.calls.state_of("B123"), None);
        assert!(matches!(
            f.calls.initiate_call("C9", None).await,
            Err(Error::TransportFailure(_))
        ));
        assert_eq!(f.calls.state_of("C9"), None);
    }

    #[tokio::test]
    async fn only_first_local_signal_is_forwarded() {
        let mut f = fixture();
        let conn = f.calls.initiate_call("B123", None).await.unwrap();
        f.calls.on_local_signal(conn, Bytes::new()).await.unwrap();
        assert!(f.calls.on_local_signal(conn, Bytes::new()).await.is_err());
        assert_eq!(f.rendezvous.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn keeps_first_remote_stream() {
        let mut f = fixture();
        let conn = f.calls.initiate_call("B123", None).await.unwrap();
        let first = MediaStreamHandle::new("first");
        assert_eq!(
            f.calls.on_remote_stream(conn, first.clone()),
            Some("B123".to_string())
        );
        assert_eq!(
            f.calls.on_remote_stream(conn, MediaStreamHandle::new("second")),
            None
        );
        assert_eq!(
            f.calls.record("B123").unwrap().remote_media_stream.as_ref(),
            Some(&first)
        );
    }

    #[test]
    fn second_identity_is_ignored() {
        let f = fixture();
        let mut calls = f.calls;
        assert!(!calls.set_identity("other".into()));
        assert_eq!(calls.identity().map(String::as_str), Some("A1"));
    }
}
