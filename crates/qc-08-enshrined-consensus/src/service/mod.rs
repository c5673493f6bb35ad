//! # Enshrined Bifrost
//!
//! The consensus-side end of the attestation pipeline. Quorum-strength vote
//! sets arrive from the local gossip layer, wait in one [`InjectCache`] per
//! fact kind, are wrapped into inject transactions when this node proposes a
//! block, and are evicted once the ledger confirms them.
//!
//! All four caches sit behind one [`PriorityRwLock`]: vote ingestion and
//! confirmation take the write lock, proposal preparation takes the priority
//! read lane so it never queues behind ingestion.

pub mod block_loop;


use crate::domain::{EnshrinedConfig, InjectCache, PriorityRwLock};
use crate::metrics;
use crate::ports::{ConfirmationSink, InjectSource};
use shared_bus::{ConsensusEvent, EventPublisher};
use shared_types::{
    Attestable, ErrataTx, FactKind, LedgerTx, NetworkFee, Quorum, QuorumFact, Solvency,
    TxObservation,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// The four per-kind caches guarded together.
pub struct InjectCaches {
    txs: InjectCache<TxObservation>,
    network_fees: InjectCache<NetworkFee>,
    solvencies: InjectCache<Solvency>,
    errata: InjectCache<ErrataTx>,
}

impl InjectCaches {
    fn new(retention: u64) -> Self {
        Self {
            txs: InjectCache::new(retention),
            network_fees: InjectCache::new(retention),
            solvencies: InjectCache::new(retention),
            errata: InjectCache::new(retention),
        }
    }
}

/// A fact kind with its own inject cache.
pub trait CachedFact: Attestable {
    fn cache(caches: &InjectCaches) -> &InjectCache<Self>;
    fn cache_mut(caches: &mut InjectCaches) -> &mut InjectCache<Self>;
}

macro_rules! cached_fact {
    ($ty:ty, $field:ident) => {
        impl CachedFact for $ty {
            fn cache(caches: &InjectCaches) -> &InjectCache<Self> {
                &caches.$field
            }

            fn cache_mut(caches: &mut InjectCaches) -> &mut InjectCache<Self> {
                &mut caches.$field
            }
        }
    };
}

cached_fact!(TxObservation, txs);
cached_fact!(NetworkFee, network_fees);
cached_fact!(Solvency, solvencies);
cached_fact!(ErrataTx, errata);

pub struct EnshrinedBifrost {
    config: EnshrinedConfig,
    caches: PriorityRwLock<InjectCaches>,
    events: Arc<dyn EventPublisher>,
}

impl EnshrinedBifrost {
    pub fn new(config: EnshrinedConfig, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            caches: PriorityRwLock::new(InjectCaches::new(config.confirmed_retention_heights)),
            config,
            events,
        }
    }

    pub fn config(&self) -> &EnshrinedConfig {
        &self.config
    }

    // =========================================================================
    // INGESTION
    // =========================================================================

    /// Merges a submitted vote set into its cache. Returns the votes added.
    pub fn add_quorum(&self, fact: QuorumFact) -> usize {
        match fact {
            QuorumFact::Tx(q) => self.add_item(q),
            QuorumFact::NetworkFee(q) => self.add_item(q),
            QuorumFact::Solvency(q) => self.add_item(q),
            QuorumFact::Errata(q) => self.add_item(q),
        }
    }

    pub fn add_item<T: CachedFact>(&self, quorum: Quorum<T>) -> usize {
        let votes = quorum.attestations.len();
        let key = quorum.item.key();
        let added = T::cache_mut(&mut self.caches.write()).add_item(quorum, Instant::now());
        if added > 0 {
            metrics::record_votes_cached(T::KIND.as_str(), added);
        }
        debug!(kind = %T::KIND, ?key, votes, added, "Cached quorum submission");
        added
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Number of pending items of `kind`.
    pub fn pending(&self, kind: FactKind) -> usize {
        let caches = self.caches.read();
        match kind {
            FactKind::ObservedTx => caches.txs.len(),
            FactKind::NetworkFee => caches.network_fees.len(),
            FactKind::Solvency => caches.solvencies.len(),
            FactKind::ErrataTx => caches.errata.len(),
        }
    }

    /// The pending vote set for `item`, if any.
    pub fn pending_item<T: CachedFact>(&self, item: &T) -> Option<Quorum<T>> {
        T::cache(&self.caches.read())
            .get(item)
            .map(|entry| entry.item.clone())
    }

    /// Every pending vote set, in proposal order.
    pub fn pending_facts(&self) -> Vec<QuorumFact> {
        let caches = self.caches.read();
        let mut facts = Vec::new();
        facts.extend(caches.txs.pending().cloned().map(QuorumFact::Tx));
        facts.extend(caches.network_fees.pending().cloned().map(QuorumFact::NetworkFee));
        facts.extend(caches.solvencies.pending().cloned().map(QuorumFact::Solvency));
        facts.extend(caches.errata.pending().cloned().map(QuorumFact::Errata));
        facts
    }

    // =========================================================================
    // PROPOSAL PREPARATION
    // =========================================================================

    /// Wraps pending items into inject transactions until `max_bytes` would be
    /// exceeded.
    ///
    /// Kinds are visited in a fixed order and accumulation stops at the first
    /// transaction that does not fit. Returns the encoded transactions and
    /// their total size.
    pub fn proposal_inject_txs(&self, max_bytes: usize) -> (Vec<Vec<u8>>, usize) {
        let caches = self.caches.priority_read();
        let mut batch = ProposalBatch::new(max_bytes);

        for kind in FactKind::ALL {
            let fits = match kind {
                FactKind::ObservedTx => batch.fill(&caches.txs),
                FactKind::NetworkFee => batch.fill(&caches.network_fees),
                FactKind::Solvency => batch.fill(&caches.solvencies),
                FactKind::ErrataTx => batch.fill(&caches.errata),
            };
            if !fits {
                break;
            }
        }
        drop(caches);

        metrics::record_inject_txs(batch.txs.len());
        if !batch.txs.is_empty() {
            debug!(txs = batch.txs.len(), bytes = batch.total, max_bytes, "Prepared inject txs");
        }
        (batch.txs, batch.total)
    }

    // =========================================================================
    // CONFIRMATION
    // =========================================================================

    /// Applies a ledger confirmation at `height` and notifies subscribers.
    ///
    /// Returns the number of pending votes removed. A repeated confirmation
    /// changes nothing and emits nothing.
    pub fn mark_confirmed<T: CachedFact>(&self, quorum: &Quorum<T>, height: u64) -> usize {
        let outcome = T::cache_mut(&mut self.caches.write()).mark_confirmed(quorum, height);

        if outcome.removed > 0 {
            metrics::record_votes_confirmed(T::KIND.as_str(), outcome.removed);
        }
        debug!(
            kind = %T::KIND,
            height,
            removed = outcome.removed,
            deleted = outcome.entry_deleted,
            "Applied ledger confirmation"
        );

        if outcome.recorded {
            let fact = T::into_quorum_fact(quorum.clone());
            match ConsensusEvent::committed(&fact, height) {
                Ok(event) => {
                    self.events.publish(event);
                }
                Err(e) => warn!(kind = %T::KIND, height, error = %e, "Failed to encode commit event"),
            }
        }
        outcome.removed
    }

    pub fn mark_quorum_tx_confirmed(&self, quorum: &Quorum<TxObservation>, height: u64) -> usize {
        self.mark_confirmed(quorum, height)
    }

    pub fn mark_quorum_network_fee_confirmed(&self, quorum: &Quorum<NetworkFee>, height: u64) -> usize {
        self.mark_confirmed(quorum, height)
    }

    pub fn mark_quorum_solvency_confirmed(&self, quorum: &Quorum<Solvency>, height: u64) -> usize {
        self.mark_confirmed(quorum, height)
    }

    pub fn mark_quorum_errata_tx_confirmed(&self, quorum: &Quorum<ErrataTx>, height: u64) -> usize {
        self.mark_confirmed(quorum, height)
    }

    // =========================================================================
    // EXPIRY
    // =========================================================================

    /// Drops pending items older than the configured TTL. Returns how many.
    pub fn prune_expired(&self) -> usize {
        let ttl = self.config.cache_ttl();
        let now = Instant::now();
        let mut caches = self.caches.write();
        let expired = prune_cache(&mut caches.txs, ttl, now)
            + prune_cache(&mut caches.network_fees, ttl, now)
            + prune_cache(&mut caches.solvencies, ttl, now)
            + prune_cache(&mut caches.errata, ttl, now);
        drop(caches);

        metrics::record_items_expired(expired);
        expired
    }

    /// Runs the TTL pruner until shutdown.
    pub async fn run_pruner(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.prune_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(ttl = ?self.config.cache_ttl(), "Inject cache pruner started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Inject cache pruner shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let expired = self.prune_expired();
                    if expired > 0 {
                        info!(expired, "Pruned expired inject cache items");
                    }
                }
            }
        }
    }
}

fn prune_cache<T: Attestable>(
    cache: &mut InjectCache<T>,
    ttl: tokio::time::Duration,
    now: Instant,
) -> usize {
    let expired = cache.prune_expired(ttl, now);
    for quorum in &expired {
        warn!(
            kind = %T::KIND,
            key = ?quorum.item.key(),
            votes = quorum.attestations.len(),
            "Dropping uninjected quorum item past TTL"
        );
    }
    expired.len()
}

/// Running accumulator for [`EnshrinedBifrost::proposal_inject_txs`].
struct ProposalBatch {
    max_bytes: usize,
    total: usize,
    txs: Vec<Vec<u8>>,
}

impl ProposalBatch {
    fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            total: 0,
            txs: Vec::new(),
        }
    }

    /// Adds every pending item of one cache. Returns false once the budget
    /// is exhausted.
    fn fill<T: Attestable>(&mut self, cache: &InjectCache<T>) -> bool {
        for quorum in cache.pending() {
            let tx = LedgerTx::inject(T::into_quorum_fact(quorum.clone()));
            let bytes = match tx.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(kind = %T::KIND, key = ?quorum.item.key(), error = %e, "Failed to encode inject tx");
                    continue;
                }
            };
            if self.total + bytes.len() > self.max_bytes {
                return false;
            }
            self.total += bytes.len();
            self.txs.push(bytes);
        }
        true
    }
}

impl InjectSource for EnshrinedBifrost {
    fn proposal_inject_txs(&self, max_bytes: usize) -> (Vec<Vec<u8>>, usize) {
        EnshrinedBifrost::proposal_inject_txs(self, max_bytes)
    }
}

impl ConfirmationSink for EnshrinedBifrost {
    fn confirm(&self, fact: &QuorumFact, height: u64) -> usize {
        match fact {
            QuorumFact::Tx(q) => self.mark_quorum_tx_confirmed(q, height),
            QuorumFact::NetworkFee(q) => self.mark_quorum_network_fee_confirmed(q, height),
            QuorumFact::Solvency(q) => self.mark_quorum_solvency_confirmed(q, height),
            QuorumFact::Errata(q) => self.mark_quorum_errata_tx_confirmed(q, height),
        }
    }
}
