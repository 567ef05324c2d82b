use std::sync::Arc;
use tokio::sync::mpsc;

mod config;
mod internal;

use crate::internal::broadcaster::Broadcaster;
use crate::internal::connection::CallManager;

// public exports
pub use config::SessionConfig;
pub use internal::broadcaster::{Canvas, Whiteboard};
pub use internal::codec::{decode, encode, DrawDelta};
pub use internal::data_types::*;
pub use internal::error::Error;
pub use internal::events::*;
pub use internal::loopback::{LoopbackNetwork, LoopbackTransport};
pub use internal::media::*;
pub use internal::registry::{PeerRegistry, RegisteredPeer};
pub use internal::rendezvous::{LocalRelay, LocalRendezvous, Rendezvous};
pub use internal::simple_webrtc::{WebRtcTransport, WebRtcTransportFactory};
pub use internal::transport::{Transport, TransportFactory};

#[cfg(feature = "test-server")]
pub mod testing;

/// peer-board
/// Calls between browser-style peers over [webrtc-rs](https://github.com/webrtc-rs/webrtc), with
/// a shared whiteboard replicated over each call's data channel.
///
/// WebRTC requires out of band signalling. A `Session` sends and receives offers and answers
/// through a `Rendezvous` client; the payloads are opaque and only interpreted by the transport
/// that made them.
///
/// This library is not responsible for media capture or rendering. It attaches a caller supplied
/// `MediaStreamHandle` to each call, reports remote streams as events, and hands drawn segments
/// to a `Canvas`.
///
/// Everything runs on one task: relay events, transport events and UI input are handled one at a
/// time, either by `run` or by `process_pending` from the embedder's own loop.
pub struct Session<C: Canvas = Whiteboard> {
    /// signaling state machine, one record per remote peer
    calls: CallManager,
    /// peers which receive draw events
    registry: PeerRegistry,
    broadcaster: Broadcaster<C>,
    rendezvous_events: mpsc::UnboundedReceiver<RendezvousEvent>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    /// used to emit events
    emitted_event_chan: mpsc::UnboundedSender<EmittedEvents>,
}

// a lazy version of the builder pattern
pub struct SessionInit<C: Canvas> {
    pub config: SessionConfig,
    pub rendezvous: Arc<dyn Rendezvous>,
    pub rendezvous_events: mpsc::UnboundedReceiver<RendezvousEvent>,
    pub transports: Arc<dyn TransportFactory>,
    pub canvas: C,
    pub emitted_event_chan: mpsc::UnboundedSender<EmittedEvents>,
}

/// The following functions are driven by the UI:
/// call
/// accept
/// decline
/// hang_up
/// pointer_down / pointer_move / pointer_up
///
/// The following are driven by the relay and the transports
/// handle_rendezvous_event
/// handle_transport_event
impl<C: Canvas> Session<C> {
    pub fn init(args: SessionInit<C>) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        Self {
            calls: CallManager::new(
                args.config.display_name,
                args.transports,
                args.rendezvous,
                transport_tx,
            ),
            registry: PeerRegistry::new(),
            broadcaster: Broadcaster::new(args.canvas),
            rendezvous_events: args.rendezvous_events,
            transport_events: transport_rx,
            emitted_event_chan: args.emitted_event_chan,
        }
    }

    /// None until the relay assigned one
    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.calls.identity()
    }

    pub fn state_of(&self, peer: &str) -> Option<ConnectionState> {
        self.calls.state_of(peer)
    }

    pub fn record(&self, peer: &str) -> Option<&ConnectionRecord> {
        self.calls.record(peer)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn canvas(&self) -> &C {
        self.broadcaster.canvas()
    }

    /// true between pointer_down and pointer_up
    pub fn is_drawing(&self) -> bool {
        self.broadcaster.is_drawing()
    }

    /// allocates a transport; the offer goes out once the transport produced it
    pub async fn call(
        &mut self,
        target: &str,
        local_media: Option<MediaStreamHandle>,
    ) -> Result<ConnectionId, Error> {
        self.calls.initiate_call(target, local_media).await
    }

    pub async fn accept(
        &mut self,
        from: &str,
        local_media: Option<MediaStreamHandle>,
    ) -> Result<ConnectionId, Error> {
        match self.calls.accept_call(from, local_media).await {
            Err(Error::TransportFailure(reason)) => {
                self.emit(EmittedEvents::CallEnded {
                    peer: from.to_string(),
                    reason: EndReason::TransportFailure(reason.clone()),
                });
                Err(Error::TransportFailure(reason))
            }
            other => other,
        }
    }

    pub fn decline(&mut self, from: &str) -> Result<(), Error> {
        if self.calls.decline_call(from) {
            Ok(())
        } else {
            Err(Error::NoPendingCall(from.to_string()))
        }
    }

    /// Ends the call from any state. Hanging up a peer without a call is a no-op.
    pub async fn hang_up(&mut self, peer: &str) {
        match self.calls.hang_up(peer).await {
            Some(record) => self.ended(record.peer, EndReason::HungUp),
            None => log::info!("called hang_up for non-connected peer {}", peer),
        }
    }

    pub async fn hang_up_all(&mut self) {
        for record in self.calls.hang_up_all().await {
            self.ended(record.peer, EndReason::HungUp);
        }
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) {
        self.broadcaster.pointer_down(x, y);
    }

    pub async fn pointer_move(&mut self, x: f64, y: f64) -> Option<DrawDelta> {
        self.broadcaster.pointer_move(x, y, &self.registry).await
    }

    pub fn pointer_up(&mut self) {
        self.broadcaster.pointer_up();
    }

    pub async fn handle_rendezvous_event(&mut self, event: RendezvousEvent) {
        match event {
            RendezvousEvent::IdentityAssigned(identity) => {
                if self.calls.set_identity(identity.clone()) {
                    self.emit(EmittedEvents::IdentityAssigned { identity });
                }
            }
            RendezvousEvent::Envelope(envelope) => {
                if let Some(identity) = self.calls.identity() {
                    if *identity != envelope.to {
                        log::warn!(
                            "dropping {} from {} addressed to {}",
                            envelope.kind,
                            &envelope.from,
                            &envelope.to
                        );
                        return;
                    }
                }
                log::debug!("signal: {} from {}", envelope.kind, &envelope.from);
                match envelope.kind {
                    SignalKind::Offer => {
                        let from = envelope.from.clone();
                        let display_name = envelope.display_name.clone();
                        match self.calls.handle_incoming_offer(envelope) {
                            Ok(()) => self.emit(EmittedEvents::IncomingCall { from, display_name }),
                            Err(e) => absorb(e),
                        }
                    }
                    SignalKind::Answer => {
                        let from = envelope.from.clone();
                        match self.calls.on_remote_answer(envelope).await {
                            Ok(()) => {}
                            Err(Error::TransportFailure(reason)) => {
                                self.ended(from, EndReason::TransportFailure(reason))
                            }
                            Err(e) => absorb(e),
                        }
                    }
                }
            }
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let TransportEvent { connection, kind } = event;
        match kind {
            TransportEventKind::LocalSignal(payload) => {
                if let Err(e) = self.calls.on_local_signal(connection, payload).await {
                    absorb(e);
                }
            }
            TransportEventKind::Connected => match self.calls.on_connected(connection) {
                Ok(record) => {
                    let peer = record.peer.clone();
                    match self.registry.add(record) {
                        Ok(()) => self.emit(EmittedEvents::CallConnected { peer }),
                        Err(e) => log::error!("failed to register {}: {}", peer, e),
                    }
                }
                Err(e) => absorb(e),
            },
            TransportEventKind::Data(data) => {
                let Some(peer) = self.registry.by_connection(connection).map(|p| p.peer.clone())
                else {
                    log::debug!("dropping data from unregistered connection {}", connection);
                    return;
                };
                if let Err(e) = self.broadcaster.apply_remote(&peer, &data) {
                    log::warn!("dropping message from {}: {}", peer, e);
                }
            }
            TransportEventKind::RemoteStream(stream) => {
                if let Some(peer) = self.calls.on_remote_stream(connection, stream.clone()) {
                    self.emit(EmittedEvents::RemoteStream { peer, stream });
                }
            }
            TransportEventKind::Closed => {
                self.end_connection(connection, EndReason::RemoteClosed).await
            }
            TransportEventKind::Failed(reason) => {
                self.end_connection(connection, EndReason::TransportFailure(reason))
                    .await
            }
        }
    }

    /// handles every event which is already queued, without waiting for more
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(event) = self.rendezvous_events.try_recv() {
                self.handle_rendezvous_event(event).await;
            } else if let Ok(event) = self.transport_events.try_recv() {
                self.handle_transport_event(event).await;
            } else {
                return handled;
            }
            handled += 1;
        }
    }

    /// Runs until `Command::Shutdown` arrives or the command channel closes, then hangs up every
    /// call. Losing the relay does not stop the loop: established calls keep working, but no new
    /// calls can be signaled.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut relay_open = true;
        loop {
            tokio::select! {
                event = self.rendezvous_events.recv(), if relay_open => match event {
                    Some(event) => self.handle_rendezvous_event(event).await,
                    None => {
                        log::warn!("rendezvous connection closed. identity is stale");
                        relay_open = false;
                    }
                },
                Some(event) = self.transport_events.recv() => {
                    self.handle_transport_event(event).await;
                }
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                }
            }
        }
        log::debug!("session loop exiting");
        self.hang_up_all().await;
    }

    async fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Call { target, media } => self.call(&target, media).await.map(|_| ()),
            Command::Accept { from, media } => self.accept(&from, media).await.map(|_| ()),
            Command::Decline { from } => self.decline(&from),
            Command::HangUp { peer } => {
                self.hang_up(&peer).await;
                Ok(())
            }
            Command::PointerDown { x, y } => {
                self.pointer_down(x, y);
                Ok(())
            }
            Command::PointerMove { x, y } => {
                self.pointer_move(x, y).await;
                Ok(())
            }
            Command::PointerUp => {
                self.pointer_up();
                Ok(())
            }
            Command::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            self.emit(EmittedEvents::CommandFailed {
                error: e.to_string(),
            });
        }
    }

    async fn end_connection(&mut self, connection: ConnectionId, reason: EndReason) {
        match self.calls.on_transport_ended(connection).await {
            Some(record) => self.ended(record.peer, reason),
            None => log::debug!("{:?} for released connection {}", reason, connection),
        }
    }

    /// the record is already terminated. drop it from the registry in the same step
    fn ended(&mut self, peer: PeerIdentity, reason: EndReason) {
        self.registry.remove(&peer);
        log::info!("call with {} ended: {:?}", &peer, &reason);
        self.emit(EmittedEvents::CallEnded { peer, reason });
    }

    fn emit(&self, event: EmittedEvents) {
        if let Err(e) = self.emitted_event_chan.send(event) {
            log::error!("failed to emit event: {}", e);
        }
    }
}

/// stale signals are expected noise; anything else is worth a warning but doesn't end the session
fn absorb(error: Error) {
    match error {
        Error::StaleSignal { .. } => log::debug!("ignoring {}", error),
        other => log::warn!("{}", other),
    }
}
