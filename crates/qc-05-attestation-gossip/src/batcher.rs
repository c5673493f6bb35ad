//! # Outbound Vote Batching
//!
//! Locally signed votes are queued per fact kind and broadcast to every
//! active-validator peer in one serialized batch.
//!
//! ## Flush Triggers
//!
//! - **Timer**: every batch interval, if anything is queued.
//! - **Force**: any queue reaching `max_batch_size` raises a single-slot,
//!   non-blocking signal that flushes immediately.
//!
//! Each queue holds at most `max_queued_per_kind` votes. Votes arriving at a
//! full queue are dropped.
//!
//! ## Fan-Out
//!
//! Each peer send runs as its own task holding one of that peer's tokens and
//! bounded by the peer timeout. The flush never waits for sends to finish.

use crate::domain::{GossipConfig, GossipError};
use crate::metrics;
use crate::peer_manager::PeerManager;
use crate::ports::outbound::PeerTransport;
use crate::validators::ActiveValidatorCache;
use crate::BATCHED_ATTESTATIONS_PROTOCOL;
use parking_lot::Mutex;
use shared_types::wire::{expect_ack, write_frame};
use shared_types::{AttestationBatch, AttestationMessage, FactKind, PeerId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Acknowledgment a peer sends after decoding a batch.
pub const BATCH_ACK: &str = "ack";

/// Reusable batch objects kept for flushes.
const BATCH_POOL_SIZE: usize = 4;

struct BatcherInner {
    batch_interval: Duration,
    max_batch_size: usize,
    max_queued: usize,
    peer_timeout: Duration,
    queues: Mutex<AttestationBatch>,
    last_flush: Mutex<Instant>,
    batch_pool: Mutex<Vec<AttestationBatch>>,
    force_tx: mpsc::Sender<()>,
    force_rx: Mutex<Option<mpsc::Receiver<()>>>,
    transport: Arc<dyn PeerTransport>,
    validators: Arc<ActiveValidatorCache>,
    peers: PeerManager,
}

/// Time/size-windowed outbound vote aggregator.
#[derive(Clone)]
pub struct AttestationBatcher {
    inner: Arc<BatcherInner>,
}

impl AttestationBatcher {
    pub fn new(
        config: &GossipConfig,
        transport: Arc<dyn PeerTransport>,
        validators: Arc<ActiveValidatorCache>,
        peers: PeerManager,
    ) -> Self {
        let (force_tx, force_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(BatcherInner {
                batch_interval: config.batch_interval(),
                max_batch_size: config.max_batch_size.max(1),
                max_queued: config.max_queued_per_kind.max(config.max_batch_size).max(1),
                peer_timeout: config.peer_timeout(),
                queues: Mutex::new(AttestationBatch::default()),
                last_flush: Mutex::new(Instant::now()),
                batch_pool: Mutex::new(Vec::with_capacity(BATCH_POOL_SIZE)),
                force_tx,
                force_rx: Mutex::new(Some(force_rx)),
                transport,
                validators,
                peers,
            }),
        }
    }

    /// Queues a locally signed vote for broadcast. Returns `false` if the
    /// kind's queue is full and the vote was dropped.
    pub fn enqueue(&self, message: AttestationMessage) -> bool {
        let kind = message.kind();
        let max = self.inner.max_queued;
        let len = {
            let mut queues = self.inner.queues.lock();
            match message {
                AttestationMessage::Tx(a) => push_bounded(&mut queues.txs, a, max),
                AttestationMessage::NetworkFee(a) => push_bounded(&mut queues.network_fees, a, max),
                AttestationMessage::Solvency(a) => push_bounded(&mut queues.solvencies, a, max),
                AttestationMessage::Errata(a) => push_bounded(&mut queues.errata, a, max),
            }
        };

        let Some(len) = len else {
            metrics::record_queued_vote_dropped(kind.as_str());
            warn!(kind = %kind, capacity = max, "Outbound vote queue full; dropping vote");
            self.force_flush();
            return false;
        };
        if len >= self.inner.max_batch_size {
            self.force_flush();
        }
        true
    }

    /// Votes of `kind` waiting to be flushed.
    pub fn queued_len(&self, kind: FactKind) -> usize {
        let queues = self.inner.queues.lock();
        match kind {
            FactKind::ObservedTx => queues.txs.len(),
            FactKind::NetworkFee => queues.network_fees.len(),
            FactKind::Solvency => queues.solvencies.len(),
            FactKind::ErrataTx => queues.errata.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queues.lock().is_empty()
    }

    fn force_flush(&self) {
        // A pending signal already covers this flush.
        let _ = self.inner.force_tx.try_send(());
    }

    fn take_batch(&self) -> AttestationBatch {
        self.inner.batch_pool.lock().pop().unwrap_or_default()
    }

    fn recycle_batch(&self, mut batch: AttestationBatch) {
        batch.clear();
        let mut pool = self.inner.batch_pool.lock();
        if pool.len() < BATCH_POOL_SIZE {
            pool.push(batch);
        }
    }

    /// Moves up to `max_batch_size` votes per kind into one batch and fans it
    /// out. Returns `true` if the queues were fully drained.
    pub async fn flush(&self) -> bool {
        let mut batch = self.take_batch();
        let cleared = {
            let mut queues = self.inner.queues.lock();
            let max = self.inner.max_batch_size;
            drain_front(&mut queues.txs, &mut batch.txs, max);
            drain_front(&mut queues.network_fees, &mut batch.network_fees, max);
            drain_front(&mut queues.solvencies, &mut batch.solvencies, max);
            drain_front(&mut queues.errata, &mut batch.errata, max);
            queues.is_empty()
        };
        *self.inner.last_flush.lock() = Instant::now();

        if batch.is_empty() {
            self.recycle_batch(batch);
            return cleared;
        }

        let votes = batch.len();
        let encoded = bincode::serialize(&batch);
        self.recycle_batch(batch);
        let payload = match encoded {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                warn!(votes, error = %e, "Failed to marshal attestation batch; dropping");
                return cleared;
            }
        };

        let peers = self.broadcast(payload).await;
        metrics::record_batch_flushed();
        debug!(votes, peers, cleared, "Flushed attestation batch");
        cleared
    }

    /// Starts one send task per active-validator peer. Returns the number of
    /// sends started.
    async fn broadcast(&self, payload: Arc<Vec<u8>>) -> usize {
        let active = match self.inner.validators.active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Cannot resolve validator set; batch not broadcast");
                return 0;
            }
        };

        let local = self.inner.transport.local_peer_id();
        let mut started = 0;
        for peer in self.inner.transport.connected_peers() {
            if peer == local || !active.contains(&peer.0) {
                continue;
            }
            let inner = self.inner.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                if let Err(e) = send_to_peer(&inner, peer, &payload).await {
                    metrics::record_peer_send_dropped();
                    debug!(peer = %peer, error = %e, "Dropped batch send to peer");
                }
            });
            started += 1;
        }
        started
    }

    /// Runs the flush loop until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut force_rx) = self.inner.force_rx.lock().take() else {
            warn!("Attestation batcher already running");
            return;
        };

        let mut ticker = interval(self.inner.batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.inner.batch_interval, "Attestation batcher started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Attestation batcher shutting down");
                    break;
                }
                Some(()) = force_rx.recv() => {
                    if !self.flush().await {
                        self.force_flush();
                    }
                }
                _ = ticker.tick() => {
                    let due = self.inner.last_flush.lock().elapsed() >= self.inner.batch_interval;
                    if due && !self.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }
    }
}

/// Pushes unless `queue` already holds `max` items. Returns the new length.
fn push_bounded<T>(queue: &mut Vec<T>, item: T, max: usize) -> Option<usize> {
    if queue.len() >= max {
        return None;
    }
    queue.push(item);
    Some(queue.len())
}

fn drain_front<T>(queue: &mut Vec<T>, into: &mut Vec<T>, max: usize) {
    let n = queue.len().min(max);
    into.extend(queue.drain(..n));
}

async fn send_to_peer(
    inner: &BatcherInner,
    peer: PeerId,
    payload: &[u8],
) -> Result<(), GossipError> {
    let _permit = inner.peers.acquire(peer).await?;
    timeout(inner.peer_timeout, async {
        let mut stream = inner
            .transport
            .open_stream(peer, BATCHED_ATTESTATIONS_PROTOCOL)
            .await?;
        write_frame(&mut stream, payload).await?;
        expect_ack(&mut stream, BATCH_ACK).await?;
        Ok::<(), GossipError>(())
    })
    .await
    .map_err(|_| GossipError::Timeout(peer))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::{BoxedStream, ValidatorSetProvider};
    use async_trait::async_trait;
    use shared_types::wire::{read_frame, write_ack};
    use shared_types::{Attest, Attestation, ErrataTx, NetworkFee, PublicKey};

    const LOCAL: [u8; 32] = [1; 32];
    const PEER: [u8; 32] = [2; 32];

    struct FixedValidators;

    #[async_trait]
    impl ValidatorSetProvider for FixedValidators {
        async fn active_validators(&self) -> Result<Vec<PublicKey>, GossipError> {
            Ok(vec![LOCAL, PEER])
        }
    }

    /// Transport whose single peer decodes each batch, reports it, and acks.
    struct RecordingTransport {
        received: mpsc::UnboundedSender<AttestationBatch>,
    }

    #[async_trait]
    impl PeerTransport for RecordingTransport {
        fn local_peer_id(&self) -> PeerId {
            PeerId::from_public_key(&LOCAL)
        }

        fn connected_peers(&self) -> Vec<PeerId> {
            vec![
                PeerId::from_public_key(&LOCAL),
                PeerId::from_public_key(&PEER),
                // Connected but not a validator.
                PeerId::from_public_key(&[3; 32]),
            ]
        }

        async fn open_stream(&self, _peer: PeerId, _protocol: &str) -> Result<BoxedStream, GossipError> {
            let (client, mut server) = tokio::io::duplex(1 << 20);
            let received = self.received.clone();
            tokio::spawn(async move {
                let bytes = read_frame(&mut server).await.unwrap();
                let batch: AttestationBatch = bincode::deserialize(&bytes).unwrap();
                write_ack(&mut server, BATCH_ACK).await.unwrap();
                let _ = received.send(batch);
            });
            Ok(Box::new(client))
        }
    }

    fn batcher(
        batch_interval_ms: u64,
        max_batch_size: usize,
    ) -> (AttestationBatcher, mpsc::UnboundedReceiver<AttestationBatch>) {
        batcher_with(GossipConfig {
            batch_interval_ms,
            max_batch_size,
            ..Default::default()
        })
    }

    fn batcher_with(
        config: GossipConfig,
    ) -> (AttestationBatcher, mpsc::UnboundedReceiver<AttestationBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let validators = Arc::new(ActiveValidatorCache::new(
            Arc::new(FixedValidators),
            config.validator_cache_ttl(),
        ));
        let peers = PeerManager::new(
            config.peer_concurrent_sends,
            config.peer_acquire_timeout(),
            config.peer_prune_interval(),
        );
        let batcher = AttestationBatcher::new(
            &config,
            Arc::new(RecordingTransport { received: tx }),
            validators,
            peers,
        );
        (batcher, rx)
    }

    fn errata_vote(n: u8) -> AttestationMessage {
        AttestationMessage::Errata(Attest::new(
            ErrataTx {
                chain: "BTC".into(),
                tx_id: format!("tx-{n}"),
            },
            Attestation::new(LOCAL, [n; 64]),
        ))
    }

    fn fee_vote(height: u64) -> AttestationMessage {
        AttestationMessage::NetworkFee(Attest::new(
            NetworkFee {
                chain: "ETH".into(),
                height,
                transaction_size: 1,
                transaction_rate: 1,
            },
            Attestation::new(LOCAL, [0; 64]),
        ))
    }

    #[tokio::test]
    async fn test_flush_leaves_remainder() {
        let (batcher, mut rx) = batcher(60_000, 2);
        for n in 0..3 {
            batcher.enqueue(errata_vote(n));
        }
        batcher.enqueue(fee_vote(1));

        assert!(!batcher.flush().await);
        assert_eq!(batcher.queued_len(FactKind::ErrataTx), 1);
        assert_eq!(batcher.queued_len(FactKind::NetworkFee), 0);

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.errata.len(), 2);
        assert_eq!(sent.network_fees.len(), 1);
        // Only the one validator peer received it.
        assert!(rx.try_recv().is_err());

        assert!(batcher.flush().await);
        assert!(batcher.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_forces_flush_before_interval() {
        let (batcher, mut rx) = batcher(3_600_000, 3);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(batcher.clone().run(shutdown_rx));

        for n in 0..3 {
            batcher.enqueue(errata_vote(n));
        }

        let sent = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("forced flush did not happen")
            .unwrap();
        assert_eq!(sent.errata.len(), 3);
        assert_eq!(batcher.queued_len(FactKind::ErrataTx), 0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_queue() {
        let (batcher, mut rx) = batcher(100, 50);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(batcher.clone().run(shutdown_rx));

        batcher.enqueue(fee_vote(7));
        let sent = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timer flush did not happen")
            .unwrap();
        assert_eq!(sent.network_fees.len(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_new_votes() {
        let config = GossipConfig {
            batch_interval_ms: 60_000,
            max_batch_size: 2,
            max_queued_per_kind: 3,
            ..Default::default()
        };
        let (batcher, mut rx) = batcher_with(config);
        for n in 0..3 {
            assert!(batcher.enqueue(errata_vote(n)));
        }
        assert!(!batcher.enqueue(errata_vote(3)));
        assert_eq!(batcher.queued_len(FactKind::ErrataTx), 3);

        // Other kinds have their own capacity.
        assert!(batcher.enqueue(fee_vote(1)));

        // Draining frees room again.
        batcher.flush().await;
        assert_eq!(rx.recv().await.unwrap().errata.len(), 2);
        assert!(batcher.enqueue(errata_vote(4)));
        assert_eq!(batcher.queued_len(FactKind::ErrataTx), 2);
    }

    #[tokio::test]
    async fn test_second_run_refused() {
        let (batcher, _rx) = batcher(1_000, 10);
        let (_tx, shutdown_rx) = watch::channel(false);
        let first = tokio::spawn(batcher.clone().run(shutdown_rx.clone()));
        tokio::task::yield_now().await;

        // Returns immediately because the force receiver is taken.
        timeout(Duration::from_secs(1), batcher.clone().run(shutdown_rx))
            .await
            .unwrap();
        first.abort();
    }
}
