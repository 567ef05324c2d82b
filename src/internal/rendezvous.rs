use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::internal::data_types::{PeerIdentity, SignalingEnvelope};
use crate::internal::events::RendezvousEvent;

/// Client side of the relay which forwards signaling envelopes between peers that aren't
/// connected yet.
///
/// Inbound traffic (the assigned identity, then envelopes in arrival order) is delivered on the
/// `RendezvousEvent` channel handed out when the client is created. Sends are fire-and-forget:
/// an Ok result only means the relay took the envelope.
#[async_trait]
pub trait Rendezvous: Send + Sync {
    async fn send(&self, envelope: SignalingEnvelope) -> Result<()>;
}

/// in-process relay. each connected client gets an identity and an inbox
#[derive(Clone, Default)]
pub struct LocalRelay {
    clients: Arc<Mutex<HashMap<PeerIdentity, mpsc::UnboundedSender<RendezvousEvent>>>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// connects a client under a freshly generated identity
    pub async fn connect(
        &self,
    ) -> Result<(Arc<LocalRendezvous>, mpsc::UnboundedReceiver<RendezvousEvent>)> {
        self.connect_as(&Uuid::new_v4().to_string()).await
    }

    pub async fn connect_as(
        &self,
        identity: &str,
    ) -> Result<(Arc<LocalRendezvous>, mpsc::UnboundedReceiver<RendezvousEvent>)> {
        if identity.is_empty() {
            bail!("identity must not be empty");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut clients = self.clients.lock().await;
            if clients.contains_key(identity) {
                bail!("identity {} is already connected", identity);
            }
            tx.send(RendezvousEvent::IdentityAssigned(identity.to_string()))?;
            clients.insert(identity.to_string(), tx);
        }
        log::debug!("relay: {} connected", identity);
        Ok((
            Arc::new(LocalRendezvous {
                identity: identity.to_string(),
                relay: self.clone(),
            }),
            rx,
        ))
    }

    /// the client's inbox is dropped. envelopes addressed to it are discarded from now on
    pub async fn disconnect(&self, identity: &str) {
        if self.clients.lock().await.remove(identity).is_none() {
            log::info!("relay: disconnect for unknown identity {}", identity);
        }
    }

    async fn forward(&self, envelope: SignalingEnvelope) {
        let clients = self.clients.lock().await;
        let Some(inbox) = clients.get(&envelope.to) else {
            log::warn!(
                "relay: dropping {} from {} to unknown identity {}",
                envelope.kind,
                &envelope.from,
                &envelope.to
            );
            return;
        };
        let to = envelope.to.clone();
        if inbox.send(RendezvousEvent::Envelope(envelope)).is_err() {
            log::warn!("relay: inbox of {} is closed", to);
        }
    }
}

/// a client of a `LocalRelay`
pub struct LocalRendezvous {
    identity: PeerIdentity,
    relay: LocalRelay,
}

impl LocalRendezvous {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

#[async_trait]
impl Rendezvous for LocalRendezvous {
    async fn send(&self, mut envelope: SignalingEnvelope) -> Result<()> {
        // the relay knows who is sending, whatever the envelope claims
        envelope.from = self.identity.clone();
        self.relay.forward(envelope).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::data_types::SignalKind;
    use bytes::Bytes;

    fn offer(to: &str) -> SignalingEnvelope {
        SignalingEnvelope {
            kind: SignalKind::Offer,
            from: "spoofed".into(),
            to: to.into(),
            payload: Bytes::from_static(b"sdp"),
            display_name: "alice".into(),
        }
    }

    #[tokio::test]
    async fn identity_is_the_first_event() {
        let relay = LocalRelay::new();
        let (client, mut rx) = relay.connect().await.unwrap();
        match rx.recv().await {
            Some(RendezvousEvent::IdentityAssigned(id)) => assert_eq!(id, client.identity()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn forwards_in_order_and_stamps_sender() {
        let relay = LocalRelay::new();
        let (a, _a_rx) = relay.connect_as("A1").await.unwrap();
        let (_b, mut b_rx) = relay.connect_as("B123").await.unwrap();
        assert!(matches!(
            b_rx.recv().await,
            Some(RendezvousEvent::IdentityAssigned(_))
        ));

        for payload in [&b"one"[..], &b"two"[..]] {
            let mut envelope = offer("B123");
            envelope.payload = Bytes::copy_from_slice(payload);
            a.send(envelope).await.unwrap();
        }
        for expected in [&b"one"[..], &b"two"[..]] {
            match b_rx.recv().await {
                Some(RendezvousEvent::Envelope(e)) => {
                    assert_eq!(e.from, "A1");
                    assert_eq!(&e.payload[..], expected);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn unknown_destination_is_dropped_silently() {
        let relay = LocalRelay::new();
        let (a, _rx) = relay.connect_as("A1").await.unwrap();
        assert!(a.send(offer("nobody")).await.is_ok());
    }

    #[tokio::test]
    async fn identities_are_unique() {
        let relay = LocalRelay::new();
        let _first = relay.connect_as("A1").await.unwrap();
        assert!(relay.connect_as("A1").await.is_err());
        assert!(relay.connect_as("").await.is_err());

        relay.disconnect("A1").await;
        assert!(relay.connect_as("A1").await.is_ok());
    }
}
