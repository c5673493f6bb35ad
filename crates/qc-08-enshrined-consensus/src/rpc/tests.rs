use super::*;
use crate::domain::{ConsensusError, EnshrinedConfig};
use crate::service::EnshrinedBifrost;
use shared_bus::InMemoryEventBus;
use shared_types::wire::{read_message, write_frame};
use shared_types::{Attestation, ErrataTx, FactKind, Quorum};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Duration;

struct Harness {
    addr: SocketAddr,
    bifrost: Arc<EnshrinedBifrost>,
    _shutdown: watch::Sender<bool>,
}

async fn start() -> Harness {
    let bus = Arc::new(InMemoryEventBus::new());
    let bifrost = Arc::new(EnshrinedBifrost::new(EnshrinedConfig::default(), bus.clone()));
    let server = LocalRpcServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)), bifrost.clone(), bus)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(server.run(rx));
    Harness {
        addr,
        bifrost,
        _shutdown: shutdown,
    }
}

fn quorum(voters: &[u8]) -> Quorum<ErrataTx> {
    Quorum::new(
        ErrataTx {
            chain: "ETH".into(),
            tx_id: "0xabc".into(),
        },
        voters
            .iter()
            .map(|n| Attestation::new([*n; 32], [*n; 64]))
            .collect(),
    )
}

#[tokio::test]
async fn test_submit_reaches_cache() {
    let harness = start().await;
    let client = RpcClient::new(harness.addr, Duration::from_secs(5));

    assert_eq!(client.submit(QuorumFact::Errata(quorum(&[1, 2, 3]))).await.unwrap(), 3);
    // Reuses the connection; only the new vote counts.
    assert_eq!(client.submit(QuorumFact::Errata(quorum(&[3, 4]))).await.unwrap(), 1);

    assert_eq!(harness.bifrost.pending(FactKind::ErrataTx), 1);
    let pending = harness.bifrost.pending_item(&quorum(&[]).item).unwrap();
    assert_eq!(pending.attestations.len(), 4);
}

#[tokio::test]
async fn test_subscription_receives_commits() {
    let harness = start().await;
    let client = RpcClient::new(harness.addr, Duration::from_secs(5));
    let mut subscription = client
        .subscribe(vec![EventType::QuorumErrataTxCommitted])
        .await
        .unwrap();

    client.submit(QuorumFact::Errata(quorum(&[1, 2, 3]))).await.unwrap();
    harness.bifrost.mark_confirmed(&quorum(&[1, 2, 3]), 9);

    let event = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, EventType::QuorumErrataTxCommitted);
    assert_eq!(event.height, 9);
    assert_eq!(event.decode_fact().unwrap(), QuorumFact::Errata(quorum(&[1, 2, 3])));
}

#[tokio::test]
async fn test_malformed_request_answered_with_error() {
    let harness = start().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    write_frame(&mut stream, &[0xff, 0xff, 0xff, 0xff]).await.unwrap();

    let response: RpcResponse = read_message(&mut stream).await.unwrap();
    assert!(matches!(response, RpcResponse::Error(_)));
}

#[tokio::test]
async fn test_submit_to_closed_endpoint_fails() {
    let harness = start().await;
    let addr = harness.addr;
    drop(harness);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = RpcClient::new(addr, Duration::from_secs(1));
    let result = client.submit(QuorumFact::Errata(quorum(&[1]))).await;
    assert!(matches!(result, Err(ConsensusError::Io(_))));
}
