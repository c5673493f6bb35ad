//! Outbound ports (SPI) for the gossip subsystem.

use crate::domain::GossipError;
use async_trait::async_trait;
use shared_types::{
    PeerId, PublicKey, QuorumErrataTx, QuorumFact, QuorumNetworkFee, QuorumSolvency, QuorumTx,
};
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream to one peer.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for S {}

pub type BoxedStream = Box<dyn PeerStream>;

/// Stream-oriented peer-to-peer transport.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Identity this node presents to peers.
    fn local_peer_id(&self) -> PeerId;

    /// Currently reachable peers. May include the local node.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Opens a new stream to `peer` speaking `protocol`.
    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<BoxedStream, GossipError>;
}

/// Receives inbound streams accepted by a transport.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle_stream(&self, protocol: &str, peer: PeerId, stream: BoxedStream);
}

/// Loopback client to the local consensus node.
#[async_trait]
pub trait ConsensusClient: Send + Sync {
    async fn send_quorum_tx(&self, quorum: QuorumTx) -> Result<(), GossipError>;

    async fn send_quorum_network_fee(&self, quorum: QuorumNetworkFee) -> Result<(), GossipError>;

    async fn send_quorum_solvency(&self, quorum: QuorumSolvency) -> Result<(), GossipError>;

    async fn send_quorum_errata_tx(&self, quorum: QuorumErrataTx) -> Result<(), GossipError>;

    /// Dispatches to the per-kind method.
    async fn send_quorum(&self, fact: QuorumFact) -> Result<(), GossipError> {
        match fact {
            QuorumFact::Tx(q) => self.send_quorum_tx(q).await,
            QuorumFact::NetworkFee(q) => self.send_quorum_network_fee(q).await,
            QuorumFact::Solvency(q) => self.send_quorum_solvency(q).await,
            QuorumFact::Errata(q) => self.send_quorum_errata_tx(q).await,
        }
    }
}

/// Source of the current active validator set.
#[async_trait]
pub trait ValidatorSetProvider: Send + Sync {
    async fn active_validators(&self) -> Result<Vec<PublicKey>, GossipError>;
}

/// Source of keysign party sizes for vaults.
#[async_trait]
pub trait KeysignPartyProvider: Send + Sync {
    /// Number of signers in `vault`'s keysign party.
    async fn party_size(&self, vault: &str) -> Result<usize, GossipError>;
}
