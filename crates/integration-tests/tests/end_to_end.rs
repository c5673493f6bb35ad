//! End-to-end: local votes → gossip → quorum → inject cache → proposal →
//! delivery → confirmation, across a four-validator cluster.

use integration_tests::{eventually, fast_gossip_config, init_test_tracing, Cluster};
use node_runtime::wiring::apply_commit;
use qc_05_attestation_gossip::{GossipConfig, StreamHandler};
use shared_bus::EventFilter;
use shared_types::{Coin, FactKind, LedgerTx, ObservedTx, QuorumFact, TxObservation};
use std::sync::Arc;
use std::time::Duration;

fn observation() -> TxObservation {
    TxObservation::new(
        ObservedTx {
            chain: "BTC".into(),
            tx_id: "9f1c".into(),
            from_address: "bc1qsender".into(),
            to_address: "bc1qvault".into(),
            coins: vec![Coin::new("BTC.BTC", 75_000)],
            gas: vec![Coin::new("BTC.BTC", 150)],
            memo: "SWAP:ETH.ETH".into(),
            block_height: 812_000,
            finalise_height: 812_000,
            observed_pub_key: "vault-1".into(),
        },
        true,
        false,
    )
}

fn pending_votes(cluster: &Cluster, index: usize) -> usize {
    cluster
        .validator(index)
        .bifrost
        .pending_item(&observation())
        .map_or(0, |quorum| quorum.attestations.len())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_validators_converge_on_one_inject_tx() {
    init_test_tracing();
    let cluster = Cluster::start(4, fast_gossip_config());
    let nodes = &cluster;

    for node in &cluster.validators {
        node.gossip.attest_observed_tx(observation()).await.unwrap();
    }

    for index in 0..4 {
        eventually("every cache holds all four votes", || async move {
            pending_votes(nodes, index) == 4
        })
        .await;
    }

    // One merged item per validator, wrapped in exactly one inject tx.
    let mut proposals = Vec::new();
    for node in &cluster.validators {
        assert_eq!(node.bifrost.pending(FactKind::ObservedTx), 1);
        let (txs, _) = node.bifrost.proposal_inject_txs(usize::MAX);
        assert_eq!(txs.len(), 1);

        let tx = LedgerTx::decode(&txs[0]).unwrap();
        let facts: Vec<&QuorumFact> = tx.quorum_facts().collect();
        assert_eq!(facts.len(), 1);
        match facts[0] {
            QuorumFact::Tx(quorum) => {
                assert_eq!(quorum.item, observation());
                assert_eq!(quorum.attestations.len(), 4);
                for signer in &cluster.validators {
                    assert!(quorum.contains(&signer.public_key));
                }
            }
            other => panic!("unexpected fact {other:?}"),
        }
        proposals.push(txs[0].clone());
    }

    // Delivery on validator 0 only clears validator 0.
    let mut commits = cluster.validator(0).bus.subscribe(EventFilter::all());
    assert_eq!(cluster.validator(0).admission.deliver(&proposals[0], 1).unwrap(), 4);
    assert_eq!(pending_votes(&cluster, 0), 0);
    for index in 1..4 {
        assert_eq!(pending_votes(&cluster, index), 4);
    }

    // The commit event feeds back into validator 0's gossip state.
    let event = commits.try_recv().unwrap().unwrap();
    assert_eq!(event.height, 1);
    assert_eq!(apply_commit(&cluster.validator(0).gossip, &event).await, 4);

    // Each remaining validator clears on its own confirmation.
    for index in 1..4 {
        let node = cluster.validator(index);
        assert_eq!(node.admission.deliver(&proposals[index], 1).unwrap(), 4);
        assert_eq!(pending_votes(&cluster, index), 0);
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_of_four_reaches_every_cache() {
    init_test_tracing();
    let cluster = Cluster::start(4, fast_gossip_config());
    let nodes = &cluster;

    for node in &cluster.validators[..3] {
        node.gossip.attest_observed_tx(observation()).await.unwrap();
    }

    // The silent validator still sees quorum through gossip.
    for index in 0..4 {
        eventually("three votes forwarded", || async move {
            pending_votes(nodes, index) == 3
        })
        .await;
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_of_four_waits_for_late_send() {
    init_test_tracing();
    let config = GossipConfig {
        min_time_between_resends_ms: 60_000,
        ..fast_gossip_config()
    };
    let cluster = Cluster::start(4, config);

    for node in &cluster.validators[..2] {
        node.gossip.attest_observed_tx(observation()).await.unwrap();
    }
    for node in &cluster.validators {
        eventually("both votes gossiped", || async move {
            node.gossip.attestation_count(&observation()).await == 2
        })
        .await;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    for node in &cluster.validators {
        assert_eq!(node.bifrost.pending(FactKind::ObservedTx), 0);
    }

    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partitioned_validator_catches_up_by_state_sync() {
    init_test_tracing();
    let cluster = Cluster::start(4, fast_gossip_config());
    let nodes = &cluster;
    let isolated = cluster.validator(3);
    cluster.network.disconnect(&isolated.peer);

    for node in &cluster.validators[..3] {
        node.gossip.attest_observed_tx(observation()).await.unwrap();
    }
    eventually("quorum among connected validators", || async move {
        pending_votes(nodes, 0) == 3
    })
    .await;
    assert_eq!(isolated.gossip.attestation_count(&observation()).await, 0);

    let handler: Arc<dyn StreamHandler> = isolated.gossip.clone();
    cluster.network.register(isolated.peer, &handler);
    let applied = isolated
        .gossip
        .request_state_from(cluster.validator(0).peer)
        .await
        .unwrap();
    assert_eq!(applied, 3);
    assert_eq!(isolated.gossip.attestation_count(&observation()).await, 3);
    assert_eq!(pending_votes(&cluster, 3), 3);

    cluster.shutdown().await;
}
