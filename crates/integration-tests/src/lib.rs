//! # Integration Tests Crate
//!
//! Multi-validator scenarios for the attestation pipeline. Each simulated
//! validator runs its own gossip service and inject cache; validators talk
//! over an in-memory network.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! ├── src/
//! │   └── lib.rs            # Cluster harness (this file)
//! └── tests/
//!     └── end_to_end.rs     # Vote → quorum → proposal → confirmation
//! ```

use node_runtime::adapters::{LocalConsensusClient, StaticKeysignParties, StaticValidatorSet};
use qc_05_attestation_gossip::{
    AttestationGossip, GossipConfig, GossipDependencies, MemoryNetwork, StreamHandler,
};
use qc_08_enshrined_consensus::{AdmissionControl, EnshrinedBifrost, EnshrinedConfig};
use shared_bus::InMemoryEventBus;
use shared_crypto::{Ed25519KeyPair, Ed25519Verifier};
use shared_types::{PeerId, PublicKey};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// One simulated validator.
pub struct ValidatorNode {
    pub public_key: PublicKey,
    pub peer: PeerId,
    pub gossip: Arc<AttestationGossip>,
    pub bifrost: Arc<EnshrinedBifrost>,
    pub bus: Arc<InMemoryEventBus>,
    pub admission: AdmissionControl,
}

/// Validators joined to one in-memory network.
pub struct Cluster {
    pub network: MemoryNetwork,
    pub validators: Vec<ValidatorNode>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Gossip tuned for fast tests: short batch interval, no startup sync wait.
pub fn fast_gossip_config() -> GossipConfig {
    GossipConfig {
        batch_interval_ms: 20,
        reconcile_interval_ms: 50,
        sync_delay_ms: 0,
        peer_timeout_ms: 2_000,
        ..Default::default()
    }
}

impl Cluster {
    /// Starts `size` validators, all members of the active set.
    pub fn start(size: u8, config: GossipConfig) -> Self {
        let keypairs: Vec<Ed25519KeyPair> = (1..=size)
            .map(|n| Ed25519KeyPair::from_seed([n; 32]))
            .collect();
        let active: Vec<PublicKey> = keypairs.iter().map(Ed25519KeyPair::public_key).collect();

        let network = MemoryNetwork::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let validators = keypairs
            .into_iter()
            .map(|keypair| {
                let public_key = keypair.public_key();
                let peer = PeerId::from_public_key(&public_key);
                let bus = Arc::new(InMemoryEventBus::new());
                let bifrost = Arc::new(EnshrinedBifrost::new(EnshrinedConfig::default(), bus.clone()));
                let gossip = Arc::new(AttestationGossip::new(
                    config.clone(),
                    GossipDependencies {
                        transport: Arc::new(network.transport(peer)),
                        consensus: Arc::new(LocalConsensusClient::new(bifrost.clone())),
                        validators: Arc::new(StaticValidatorSet::new(active.clone())),
                        keysign: Arc::new(StaticKeysignParties::new(HashMap::new())),
                        verifier: Arc::new(Ed25519Verifier),
                        signer: Arc::new(keypair),
                    },
                ));
                let handler: Arc<dyn StreamHandler> = gossip.clone();
                network.register(peer, &handler);
                tasks.extend(gossip.spawn_background(shutdown_rx.clone()));

                ValidatorNode {
                    public_key,
                    peer,
                    admission: AdmissionControl::new(bifrost.clone()),
                    gossip,
                    bifrost,
                    bus,
                }
            })
            .collect();

        Self {
            network,
            validators,
            shutdown_tx,
            tasks,
        }
    }

    pub fn validator(&self, index: usize) -> &ValidatorNode {
        &self.validators[index]
    }

    /// Stops every background task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Polls `check` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

/// Installs a test subscriber honouring `RUST_LOG`; repeated calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
