use crate::internal::data_types::PeerIdentity;

/// Errors produced by the call and replication layer.
///
/// Only `InvalidTarget`, `CallInProgress`, `NoPendingCall` and `IdentityUnassigned` are meant for
/// the caller. `MalformedDelta` and `StaleSignal` are absorbed by the session and logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid call target: {0:?}")]
    InvalidTarget(String),

    #[error("a call with {0} is already in progress")]
    CallInProgress(PeerIdentity),

    #[error("no pending call from {0}")]
    NoPendingCall(PeerIdentity),

    #[error("identity has not been assigned by the rendezvous service yet")]
    IdentityUnassigned,

    #[error("malformed draw delta: {0}")]
    MalformedDelta(String),

    #[error("stale signal from {peer}: {reason}")]
    StaleSignal { peer: PeerIdentity, reason: String },

    #[error("peer {0} is not connected")]
    NotConnected(PeerIdentity),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("rendezvous failure: {0}")]
    Rendezvous(String),
}

impl Error {
    pub(crate) fn stale(peer: &str, reason: impl Into<String>) -> Self {
        Self::StaleSignal {
            peer: peer.to_string(),
            reason: reason.into(),
        }
    }
}
