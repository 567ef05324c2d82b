use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::internal::data_types::{ConnectionId, Role};
use crate::internal::events::TransportEvent;
use crate::internal::media::MediaStreamHandle;

/// One bidirectional connection to a remote peer: media plus a data channel.
///
/// Progress is reported as `TransportEvent`s tagged with the `ConnectionId` the transport was
/// created with. An initiator reports its offer as a `LocalSignal` on its own; a responder
/// reports its answer after `signal` was called with the remote offer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// feed a handshake payload produced by the remote transport
    async fn signal(&self, payload: Bytes) -> Result<()>;

    /// send one data channel message
    async fn send(&self, data: Bytes) -> Result<()>;

    /// tear down the connection. called at most once per transport
    async fn close(&self) -> Result<()>;
}

/// allocates transports. swapping the factory swaps the handshake implementation
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        connection: ConnectionId,
        role: Role,
        local_media: Option<MediaStreamHandle>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn Transport>>;
}
