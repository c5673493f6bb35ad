//! Consensus clients for the gossip subsystem.
//!
//! [`RpcConsensusClient`] talks to the consensus node over the loopback RPC.
//! [`LocalConsensusClient`] calls an in-process [`EnshrinedBifrost`] directly.

use async_trait::async_trait;
use qc_05_attestation_gossip::{ConsensusClient, GossipError};
use qc_08_enshrined_consensus::{EnshrinedBifrost, RpcClient};
use shared_types::{QuorumErrataTx, QuorumFact, QuorumNetworkFee, QuorumSolvency, QuorumTx};
use std::sync::Arc;
use tracing::debug;

pub struct RpcConsensusClient {
    rpc: RpcClient,
}

impl RpcConsensusClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    async fn submit(&self, fact: QuorumFact) -> Result<(), GossipError> {
        let kind = fact.kind();
        let added = self
            .rpc
            .submit(fact)
            .await
            .map_err(|e| GossipError::Consensus(e.to_string()))?;
        debug!(kind = ?kind, added, "Submitted quorum over RPC");
        Ok(())
    }
}

#[async_trait]
impl ConsensusClient for RpcConsensusClient {
    async fn send_quorum_tx(&self, quorum: QuorumTx) -> Result<(), GossipError> {
        self.submit(QuorumFact::Tx(quorum)).await
    }

    async fn send_quorum_network_fee(&self, quorum: QuorumNetworkFee) -> Result<(), GossipError> {
        self.submit(QuorumFact::NetworkFee(quorum)).await
    }

    async fn send_quorum_solvency(&self, quorum: QuorumSolvency) -> Result<(), GossipError> {
        self.submit(QuorumFact::Solvency(quorum)).await
    }

    async fn send_quorum_errata_tx(&self, quorum: QuorumErrataTx) -> Result<(), GossipError> {
        self.submit(QuorumFact::Errata(quorum)).await
    }
}

/// In-process client; used when gossip and consensus share a process.
pub struct LocalConsensusClient {
    bifrost: Arc<EnshrinedBifrost>,
}

impl LocalConsensusClient {
    pub fn new(bifrost: Arc<EnshrinedBifrost>) -> Self {
        Self { bifrost }
    }
}

#[async_trait]
impl ConsensusClient for LocalConsensusClient {
    async fn send_quorum_tx(&self, quorum: QuorumTx) -> Result<(), GossipError> {
        self.bifrost.add_item(quorum);
        Ok(())
    }

    async fn send_quorum_network_fee(&self, quorum: QuorumNetworkFee) -> Result<(), GossipError> {
        self.bifrost.add_item(quorum);
        Ok(())
    }

    async fn send_quorum_solvency(&self, quorum: QuorumSolvency) -> Result<(), GossipError> {
        self.bifrost.add_item(quorum);
        Ok(())
    }

    async fn send_quorum_errata_tx(&self, quorum: QuorumErrataTx) -> Result<(), GossipError> {
        self.bifrost.add_item(quorum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qc_08_enshrined_consensus::{EnshrinedConfig, LocalRpcServer};
    use shared_bus::InMemoryEventBus;
    use shared_types::{Attestation, ErrataTx, FactKind, Quorum};
    use std::time::Duration;
    use tokio::sync::watch;

    fn errata() -> QuorumErrataTx {
        Quorum::new(
            ErrataTx {
                chain: "BTC".into(),
                tx_id: "reorged".into(),
            },
            vec![Attestation::new([1; 32], [1; 64])],
        )
    }

    fn bifrost() -> (Arc<EnshrinedBifrost>, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let bifrost = Arc::new(EnshrinedBifrost::new(EnshrinedConfig::default(), bus.clone()));
        (bifrost, bus)
    }

    #[tokio::test]
    async fn test_local_client_adds_to_cache() {
        let (bifrost, _) = bifrost();
        let client = LocalConsensusClient::new(bifrost.clone());
        client.send_quorum(QuorumFact::Errata(errata())).await.unwrap();
        assert_eq!(bifrost.pending(FactKind::ErrataTx), 1);
    }

    #[tokio::test]
    async fn test_rpc_client_adds_to_remote_cache() {
        let (bifrost, bus) = bifrost();
        let server = LocalRpcServer::bind("127.0.0.1:0".parse().unwrap(), bifrost.clone(), bus)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(shutdown_rx));

        let client = RpcConsensusClient::new(RpcClient::new(addr, Duration::from_secs(2)));
        client.send_quorum_errata_tx(errata()).await.unwrap();
        assert_eq!(bifrost.pending(FactKind::ErrataTx), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_failure_maps_to_consensus_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RpcConsensusClient::new(RpcClient::new(addr, Duration::from_secs(1)));
        assert!(matches!(
            client.send_quorum_errata_tx(errata()).await,
            Err(GossipError::Consensus(_))
        ));
    }
}
