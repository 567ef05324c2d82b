use bytes::Bytes;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

use crate::internal::data_types::{ConnectionId, ConnectionRecord, ConnectionState, PeerIdentity};
use crate::internal::error::Error;
use crate::internal::transport::Transport;

/// a connected peer, as seen by the broadcaster
#[derive(Clone)]
pub struct RegisteredPeer {
    pub peer: PeerIdentity,
    pub connection: ConnectionId,
    pub transport: Arc<dyn Transport>,
}

/// The set of peers which receive draw events.
///
/// Only records in the Connected state get in, so a peer mid-handshake never receives broadcast
/// traffic.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerIdentity, RegisteredPeer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &ConnectionRecord) -> Result<(), Error> {
        if record.state != ConnectionState::Connected {
            return Err(Error::NotConnected(record.peer.clone()));
        }
        let (Some(connection), Some(transport)) = (record.connection, record.transport()) else {
            return Err(Error::NotConnected(record.peer.clone()));
        };
        let entry = RegisteredPeer {
            peer: record.peer.clone(),
            connection,
            transport: transport.clone(),
        };
        if self.peers.insert(record.peer.clone(), entry).is_some() {
            log::warn!("replaced registry entry for peer {}", &record.peer);
        }
        log::debug!("registered peer {} ({} total)", &record.peer, self.peers.len());
        Ok(())
    }

    pub fn remove(&mut self, peer: &str) -> Option<RegisteredPeer> {
        let removed = self.peers.remove(peer);
        if removed.is_some() {
            log::debug!("unregistered peer {} ({} left)", peer, self.peers.len());
        }
        removed
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    /// the registered peer which owns this transport, if any
    pub fn by_connection(&self, connection: ConnectionId) -> Option<&RegisteredPeer> {
        self.peers.values().find(|p| p.connection == connection)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// ordered by identity so iteration is reproducible
    pub fn snapshot(&self) -> Vec<RegisteredPeer> {
        let mut peers: Vec<RegisteredPeer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.peer.cmp(&b.peer));
        peers
    }

    /// Sends `data` to every registered peer. A failure for one peer is logged and does not
    /// stop delivery to the others; nothing is retried. Returns the number of successful sends.
    pub async fn broadcast(&self, data: &Bytes) -> usize {
        let peers = self.snapshot();
        let results = join_all(peers.iter().map(|p| p.transport.send(data.clone()))).await;
        let mut delivered = 0;
        for (peer, result) in peers.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => log::error!("failed to send draw event to peer {}: {}", &peer.peer, e),
            }
        }
        delivered
    }
}
