//! Error types for the gossip subsystem.

use shared_crypto::CryptoError;
use shared_types::{NodeId, PeerId, PublicKey, TypesError};
use thiserror::Error;

/// Errors adding a vote to a fact's state.
#[derive(Debug, Error)]
pub enum AttestationError {
    /// The validator already voted on this fact with a different signature.
    #[error("Signature already present for {pub_key}")]
    SignatureAlreadyPresent { pub_key: String },

    #[error("Invalid signature from {pub_key}: {source}")]
    InvalidSignature {
        pub_key: String,
        #[source]
        source: CryptoError,
    },

    #[error("Failed to build signable payload: {0}")]
    Payload(#[from] TypesError),
}

/// Gossip subsystem errors.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error(transparent)]
    Attestation(#[from] AttestationError),

    /// This node is not in the active validator set.
    #[error("Local node is not an active validator")]
    NotActiveValidator,

    /// The vote's signer is not in the active validator set.
    #[error("Signer {0} is not an active validator")]
    UnknownSigner(String),

    /// Every send token for this peer is taken.
    #[error("Peer busy: {0}")]
    PeerBusy(PeerId),

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Timed out talking to peer {0}")]
    Timeout(PeerId),

    /// The peer violated the stream protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Wire error: {0}")]
    Wire(#[from] TypesError),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The local consensus node rejected or did not receive a submission.
    #[error("Consensus client error: {0}")]
    Consensus(String),

    #[error("Validator set unavailable: {0}")]
    ValidatorSet(String),
}

impl From<std::io::Error> for GossipError {
    fn from(err: std::io::Error) -> Self {
        Self::Wire(TypesError::Io(err))
    }
}

/// Short printable form of a validator key for errors and logs.
pub(crate) fn short_key(pub_key: &PublicKey) -> String {
    NodeId::from_public_key(pub_key).to_string()
}
