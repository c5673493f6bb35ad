//! # Node Container
//!
//! Builds and owns every component of a validator node and starts their
//! background tasks.
//!
//! ## Wiring
//!
//! ```text
//! [TcpPeerListener] ──streams──→ [AttestationGossip] ──ConsensusClient──→ [EnshrinedBifrost]
//!                                       ↑                                       │
//!                                       └──── commit feedback ←── [Event Bus] ←─┘
//! ```
//!
//! With the RPC endpoint enabled, gossip submits and receives commits over
//! the loopback RPC exactly as an out-of-process gossip daemon would.
//! Otherwise it calls the cache directly and reads the bus in-process.

pub mod config;

use crate::adapters::{
    LocalConsensusClient, RpcConsensusClient, StaticKeysignParties, StaticValidatorSet,
    TcpPeerListener, TcpPeerTransport,
};
use crate::wiring::{forward_local_commits, forward_rpc_commits};
use config::{ConfigError, NodeConfig};
use qc_05_attestation_gossip::{
    AttestationGossip, ConsensusClient, GossipDependencies, StreamHandler,
};
use qc_08_enshrined_consensus::{
    AdmissionControl, ConsensusError, EnshrinedBifrost, LocalBlockProducer, LocalRpcServer,
    RpcClient,
};
use shared_bus::{EventFilter, EventType, InMemoryEventBus};
use shared_crypto::{AttestationSigner, Ed25519KeyPair, Ed25519Verifier};
use shared_types::{PeerId, PublicKey};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Consensus setup failed: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Failed to bind peer listener on {addr}: {source}")]
    PeerListener {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// All components of one node.
pub struct NodeContainer {
    pub config: NodeConfig,
    pub local_key: PublicKey,
    pub bus: Arc<InMemoryEventBus>,
    pub bifrost: Arc<EnshrinedBifrost>,
    pub gossip: Arc<AttestationGossip>,
    pub admission: AdmissionControl,
    rpc_server: Option<LocalRpcServer>,
    /// Commit subscription client; submissions use their own connection.
    rpc_client: Option<RpcClient>,
    peer_listener: TcpPeerListener,
}

impl NodeContainer {
    /// Builds every component and binds the listening sockets.
    pub async fn build(config: NodeConfig) -> Result<Self, ContainerError> {
        let keypair = match config.identity_seed()? {
            Some(seed) => Ed25519KeyPair::from_seed(seed),
            None => {
                warn!("No identity seed configured; using an ephemeral key");
                Ed25519KeyPair::generate()
            }
        };
        let local_key = AttestationSigner::public_key(&keypair);
        let local_peer = PeerId::from_public_key(&local_key);

        let mut validators = config.validator_keys()?;
        if validators.is_empty() {
            warn!("No validator set configured; running as the only validator");
            validators.push(local_key);
        }

        let bus = Arc::new(InMemoryEventBus::with_capacity(config.consensus.event_capacity));
        let bifrost = Arc::new(EnshrinedBifrost::new(config.consensus.clone(), bus.clone()));
        let admission = AdmissionControl::new(bifrost.clone());

        let (rpc_server, rpc_client) = if config.consensus.rpc_enabled {
            let server =
                LocalRpcServer::bind(config.consensus.rpc_listen_addr, bifrost.clone(), bus.clone())
                    .await?;
            let client = RpcClient::new(loopback(server.local_addr()?), config.gossip.peer_timeout());
            (Some(server), Some(client))
        } else {
            (None, None)
        };
        let consensus: Arc<dyn ConsensusClient> = match &rpc_client {
            Some(client) => Arc::new(RpcConsensusClient::new(RpcClient::new(
                client.addr(),
                config.gossip.peer_timeout(),
            ))),
            None => Arc::new(LocalConsensusClient::new(bifrost.clone())),
        };

        let transport = Arc::new(TcpPeerTransport::new(
            local_peer,
            config.peer_book()?,
            config.network.dial_timeout(),
        ));
        let gossip = Arc::new(AttestationGossip::new(
            config.gossip.clone(),
            GossipDependencies {
                transport,
                consensus,
                validators: Arc::new(StaticValidatorSet::new(validators)),
                keysign: Arc::new(StaticKeysignParties::new(
                    config.validators.keysign_parties.clone(),
                )),
                verifier: Arc::new(Ed25519Verifier),
                signer: Arc::new(keypair),
            },
        ));

        let handler: Arc<dyn StreamHandler> = gossip.clone();
        let peer_listener =
            TcpPeerListener::bind(config.network.listen_addr, handler, config.gossip.peer_timeout())
                .await
                .map_err(|source| ContainerError::PeerListener {
                    addr: config.network.listen_addr,
                    source,
                })?;

        info!(peer = %local_peer, "Node components built");
        Ok(Self {
            config,
            local_key,
            bus,
            bifrost,
            gossip,
            admission,
            rpc_server,
            rpc_client,
            peer_listener,
        })
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.peer_listener.local_addr()
    }

    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc_client.as_ref().map(RpcClient::addr)
    }

    /// Spawns every background task; all stop when `shutdown` flips.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(self.bifrost.clone().run_pruner(shutdown.clone())));
        if let Some(server) = self.rpc_server {
            tasks.push(tokio::spawn(server.run(shutdown.clone())));
        }
        if self.config.consensus.local_block_production {
            let producer = Arc::new(LocalBlockProducer::new(
                self.bifrost.clone(),
                self.admission.clone(),
                self.config.consensus.max_inject_bytes,
            ));
            tasks.push(tokio::spawn(
                producer.run(self.config.consensus.block_interval(), shutdown.clone()),
            ));
        }

        tasks.extend(self.gossip.spawn_background(shutdown.clone()));
        tasks.push(tokio::spawn(self.peer_listener.run(shutdown.clone())));

        let feedback = match self.rpc_client {
            Some(client) => tokio::spawn(forward_rpc_commits(
                self.gossip.clone(),
                client,
                shutdown.clone(),
            )),
            None => tokio::spawn(forward_local_commits(
                self.gossip.clone(),
                self.bus.subscribe(EventFilter::types(EventType::ALL.to_vec())),
                shutdown,
            )),
        };
        tasks.push(feedback);

        info!(tasks = tasks.len(), "Node started");
        tasks
    }
}

/// Maps a wildcard bind address to loopback for local dialing.
fn loopback(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::from(([127, 0, 0, 1], addr.port()))
    } else {
        addr
    }
}
