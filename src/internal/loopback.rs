//! In-process transport. Pairs an initiator with the responder which was fed its offer, then
//! moves data channel messages between their event channels. Used by tests and offline demos.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::internal::data_types::{ConnectionId, Role};
use crate::internal::events::{TransportEvent, TransportEventKind};
use crate::internal::media::MediaStreamHandle;
use crate::internal::transport::{Transport, TransportFactory};

#[derive(Clone)]
struct Endpoint {
    connection: ConnectionId,
    events: mpsc::UnboundedSender<TransportEvent>,
    media: Option<MediaStreamHandle>,
}

impl Endpoint {
    fn emit(&self, kind: TransportEventKind) {
        if self.events.send(TransportEvent::new(self.connection, kind)).is_err() {
            log::debug!("loopback: event channel of {} is closed", self.connection);
        }
    }
}

struct Link {
    local: Endpoint,
    remote: Endpoint,
}

#[derive(Default)]
struct Shared {
    next_token: u64,
    /// initiators waiting for a responder
    offers: HashMap<u64, Endpoint>,
    /// responders waiting for the initiator to apply their answer
    answers: HashMap<u64, Endpoint>,
    links: HashMap<ConnectionId, Link>,
}

/// Hands out transports which can only reach each other.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// fails every open connection, as if the network went away
    pub async fn sever_all(&self, reason: &str) {
        let mut shared = self.shared.lock().await;
        for (_, link) in shared.links.drain() {
            link.local
                .emit(TransportEventKind::Failed(reason.to_string()));
        }
    }

    pub async fn open_connections(&self) -> usize {
        self.shared.lock().await.links.len()
    }
}

#[async_trait]
impl TransportFactory for LoopbackNetwork {
    async fn create(
        &self,
        connection: ConnectionId,
        role: Role,
        local_media: Option<MediaStreamHandle>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn Transport>> {
        let local = Endpoint {
            connection,
            events,
            media: local_media,
        };
        let mut token = None;
        if role == Role::Initiator {
            let mut shared = self.shared.lock().await;
            shared.next_token += 1;
            let t = shared.next_token;
            shared.offers.insert(t, local.clone());
            local.emit(TransportEventKind::LocalSignal(Bytes::from(format!(
                "offer:{}",
                t
            ))));
            token = Some(t);
        }
        Ok(Arc::new(LoopbackTransport {
            role,
            local,
            network: self.clone(),
            token: Mutex::new(token),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct LoopbackTransport {
    role: Role,
    local: Endpoint,
    network: LoopbackNetwork,
    token: Mutex<Option<u64>>,
    closed: AtomicBool,
}

fn parse_signal(payload: &[u8], expected: &str) -> Result<u64> {
    let text = std::str::from_utf8(payload).context("signal is not utf-8")?;
    let Some((kind, token)) = text.split_once(':') else {
        bail!("unrecognized signal {:?}", text);
    };
    if kind != expected {
        bail!("expected {}, got {}", expected, kind);
    }
    token.parse().context("bad signal token")
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn signal(&self, payload: Bytes) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("transport is closed");
        }
        let mut shared = self.network.shared.lock().await;
        match self.role {
            Role::Responder => {
                let token = parse_signal(&payload, "offer")?;
                if shared.offers.remove(&token).is_none() {
                    bail!("offer {} is not available", token);
                }
                shared.answers.insert(token, self.local.clone());
                *self.token.lock().await = Some(token);
                self.local
                    .emit(TransportEventKind::LocalSignal(Bytes::from(format!(
                        "answer:{}",
                        token
                    ))));
            }
            Role::Initiator => {
                let token = parse_signal(&payload, "answer")?;
                if *self.token.lock().await != Some(token) {
                    bail!("answer {} does not match our offer", token);
                }
                let Some(remote) = shared.answers.remove(&token) else {
                    bail!("no responder for {}", token);
                };
                let local = self.local.clone();
                shared.links.insert(
                    local.connection,
                    Link {
                        local: local.clone(),
                        remote: remote.clone(),
                    },
                );
                shared.links.insert(
                    remote.connection,
                    Link {
                        local: remote.clone(),
                        remote: local.clone(),
                    },
                );
                for (end, other) in [(&local, &remote), (&remote, &local)] {
                    end.emit(TransportEventKind::Connected);
                    if let Some(media) = &other.media {
                        end.emit(TransportEventKind::RemoteStream(media.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let shared = self.network.shared.lock().await;
        let Some(link) = shared.links.get(&self.local.connection) else {
            bail!("data channel is not open");
        };
        link.remote.emit(TransportEventKind::Data(data));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            log::warn!("loopback: {} closed twice", self.local.connection);
            return Ok(());
        }
        let mut shared = self.network.shared.lock().await;
        if let Some(token) = *self.token.lock().await {
            shared.offers.remove(&token);
            shared.answers.remove(&token);
        }
        if let Some(link) = shared.links.remove(&self.local.connection) {
            shared.links.remove(&link.remote.connection);
            link.remote.emit(TransportEventKind::Closed);
        }
        Ok(())
    }
}
