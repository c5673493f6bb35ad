//! Single-node lifecycle: a local vote travels through gossip, the inject
//! cache and a locally produced block, and every task stops on shutdown.

use node_runtime::{NodeConfig, NodeContainer};
use shared_bus::EventFilter;
use shared_crypto::Ed25519KeyPair;
use shared_types::{ErrataTx, FactKind, QuorumFact};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

const SEED: [u8; 32] = [7; 32];

fn config(rpc_enabled: bool) -> NodeConfig {
    let mut config = NodeConfig::from_toml(&format!(
        r#"
        [identity]
        seed = "{}"

        [network]
        listen_addr = "127.0.0.1:0"

        [gossip]
        batch_interval_ms = 50
        sync_delay_ms = 10

        [consensus]
        rpc_listen_addr = "127.0.0.1:0"
        block_interval_ms = 100
        "#,
        hex::encode(SEED)
    ))
    .unwrap();
    config.consensus.rpc_enabled = rpc_enabled;
    config
}

fn errata() -> ErrataTx {
    ErrataTx {
        chain: "BTC".into(),
        tx_id: "reorged".into(),
    }
}

async fn vote_reaches_block(rpc_enabled: bool) {
    let container = NodeContainer::build(config(rpc_enabled)).await.unwrap();
    assert_eq!(container.local_key, Ed25519KeyPair::from_seed(SEED).public_key());
    assert_eq!(container.rpc_addr().is_some(), rpc_enabled);

    let gossip = container.gossip.clone();
    let bifrost = container.bifrost.clone();
    let mut commits = container.bus.subscribe(EventFilter::all());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = container.start(shutdown_rx);

    // Sole validator: one vote is a quorum.
    gossip.attest_errata_tx(errata()).await.unwrap();
    assert_eq!(gossip.attestation_count(&errata()).await, 1);

    let event = timeout(Duration::from_secs(5), commits.recv())
        .await
        .unwrap()
        .unwrap();
    match event.decode_fact().unwrap() {
        QuorumFact::Errata(quorum) => {
            assert_eq!(quorum.item, errata());
            assert_eq!(quorum.attestations.len(), 1);
        }
        other => panic!("unexpected commit {other:?}"),
    }
    assert_eq!(bifrost.pending(FactKind::ErrataTx), 0);

    shutdown_tx.send(true).unwrap();
    for task in tasks {
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_vote_reaches_block_over_rpc() {
    vote_reaches_block(true).await;
}

#[tokio::test]
async fn test_vote_reaches_block_in_process() {
    vote_reaches_block(false).await;
}

#[tokio::test]
async fn test_invalid_seed_fails_build() {
    let mut config = config(false);
    config.identity.seed = Some("not-hex".into());
    assert!(NodeContainer::build(config).await.is_err());
}
