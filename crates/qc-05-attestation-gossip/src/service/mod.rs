//! # Attestation Gossip Service
//!
//! Owns the four per-kind fact maps and routes every vote, whether signed
//! locally, received in a peer batch or pulled by bulk sync, through the same
//! [`AttestationGossip::handle_attestation`] path.
//!
//! ## Dependencies
//!
//! All collaborators are injected through [`GossipDependencies`]:
//! - `PeerTransport`: peer streams for batches and bulk sync
//! - `ConsensusClient`: loopback submission of quorum vote sets
//! - `ValidatorSetProvider` / `KeysignPartyProvider`: quorum denominators
//! - `AttestationVerifier` / `AttestationSigner`: vote signatures
//!
//! ## Background Tasks
//!
//! [`AttestationGossip::spawn_background`] starts the batcher, the reconcile
//! loop (expiry, late re-sends, cache pruning) and a one-shot startup sync.

pub mod store;


use crate::batcher::{AttestationBatcher, BATCH_ACK};
use crate::domain::{
    AttestationError, FractionSupermajority, GossipConfig, GossipError, SupermajorityPolicy,
};
use crate::metrics;
use crate::peer_manager::PeerManager;
use crate::ports::outbound::{
    BoxedStream, ConsensusClient, KeysignPartyProvider, PeerTransport, StreamHandler,
    ValidatorSetProvider,
};
use crate::sync::{self, SyncFrame};
use crate::validators::{ActiveValidatorCache, KeysignPartyCache};
use crate::{ATTESTATION_STATE_PROTOCOL, BATCHED_ATTESTATIONS_PROTOCOL};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use shared_crypto::{AttestationSigner, AttestationVerifier};
use shared_types::wire::{read_frame, read_message, write_ack};
use shared_types::{
    Attest, Attestable, Attestation, AttestationBatch, AttestationMessage, ErrataTx, FactKind,
    NetworkFee, PeerId, PublicKey, Quorum, QuorumFact, QuorumState, Solvency, TxObservation,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use store::FactStore;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A fact kind the gossip service keeps a map for.
pub trait GossipFact: Attestable {
    fn store(gossip: &AttestationGossip) -> &FactStore<Self>;
}

impl GossipFact for TxObservation {
    fn store(gossip: &AttestationGossip) -> &FactStore<Self> {
        &gossip.txs
    }
}

impl GossipFact for NetworkFee {
    fn store(gossip: &AttestationGossip) -> &FactStore<Self> {
        &gossip.network_fees
    }
}

impl GossipFact for Solvency {
    fn store(gossip: &AttestationGossip) -> &FactStore<Self> {
        &gossip.solvencies
    }
}

impl GossipFact for ErrataTx {
    fn store(gossip: &AttestationGossip) -> &FactStore<Self> {
        &gossip.errata
    }
}

/// Collaborators for [`AttestationGossip`].
pub struct GossipDependencies {
    pub transport: Arc<dyn PeerTransport>,
    pub consensus: Arc<dyn ConsensusClient>,
    pub validators: Arc<dyn ValidatorSetProvider>,
    pub keysign: Arc<dyn KeysignPartyProvider>,
    pub verifier: Arc<dyn AttestationVerifier>,
    pub signer: Arc<dyn AttestationSigner>,
}

/// Attestation gossip service.
///
/// Thread-safe; share it via `Arc`.
pub struct AttestationGossip {
    config: GossipConfig,
    local_key: PublicKey,
    transport: Arc<dyn PeerTransport>,
    consensus: Arc<dyn ConsensusClient>,
    verifier: Arc<dyn AttestationVerifier>,
    signer: Arc<dyn AttestationSigner>,
    supermajority: Box<dyn SupermajorityPolicy>,
    validators: Arc<ActiveValidatorCache>,
    keysign: KeysignPartyCache,
    send_peers: PeerManager,
    receive_peers: PeerManager,
    batcher: AttestationBatcher,
    txs: FactStore<TxObservation>,
    network_fees: FactStore<NetworkFee>,
    solvencies: FactStore<Solvency>,
    errata: FactStore<ErrataTx>,
}

impl AttestationGossip {
    pub fn new(config: GossipConfig, deps: GossipDependencies) -> Self {
        let validators = Arc::new(ActiveValidatorCache::new(
            deps.validators,
            config.validator_cache_ttl(),
        ));
        let send_peers = PeerManager::new(
            config.peer_concurrent_sends,
            config.peer_acquire_timeout(),
            config.peer_prune_interval(),
        );
        let receive_peers = PeerManager::new(
            config.peer_concurrent_receives,
            config.peer_acquire_timeout(),
            config.peer_prune_interval(),
        );
        let batcher = AttestationBatcher::new(
            &config,
            deps.transport.clone(),
            validators.clone(),
            send_peers.clone(),
        );
        let supermajority = FractionSupermajority::new(
            config.supermajority_numerator,
            config.supermajority_denominator,
        );

        Self {
            local_key: deps.signer.public_key(),
            transport: deps.transport,
            consensus: deps.consensus,
            verifier: deps.verifier,
            signer: deps.signer,
            supermajority: Box::new(supermajority),
            keysign: KeysignPartyCache::new(deps.keysign, config.keysign_cache_ttl()),
            validators,
            send_peers,
            receive_peers,
            batcher,
            txs: FactStore::new(config.state_pool_capacity),
            network_fees: FactStore::new(config.state_pool_capacity),
            solvencies: FactStore::new(config.state_pool_capacity),
            errata: FactStore::new(config.state_pool_capacity),
            config,
        }
    }

    /// Replaces the quorum predicate built from the configured fraction.
    pub fn with_supermajority(mut self, policy: impl SupermajorityPolicy + 'static) -> Self {
        self.supermajority = Box::new(policy);
        self
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn batcher(&self) -> &AttestationBatcher {
        &self.batcher
    }

    pub fn local_public_key(&self) -> PublicKey {
        self.local_key
    }

    /// Number of facts of `kind` currently tracked.
    pub fn tracked(&self, kind: FactKind) -> usize {
        match kind {
            FactKind::ObservedTx => self.txs.len(),
            FactKind::NetworkFee => self.network_fees.len(),
            FactKind::Solvency => self.solvencies.len(),
            FactKind::ErrataTx => self.errata.len(),
        }
    }

    /// Votes held for `item`, or 0 if it is not tracked.
    pub async fn attestation_count<T: GossipFact>(&self, item: &T) -> usize {
        match T::store(self).get(&item.key()) {
            Some(state) => state.lock().await.attestation_count(),
            None => 0,
        }
    }

    // =========================================================================
    // VOTE INGESTION
    // =========================================================================

    /// Validates and records one vote, forwarding the fact to consensus if it
    /// now has quorum.
    ///
    /// Returns `Ok(false)` for an already-known identical vote.
    pub async fn handle_attestation<T: GossipFact>(
        &self,
        attest: Attest<T>,
    ) -> Result<bool, GossipError> {
        let Attest { item, attestation } = attest;

        let active = self.validators.active().await?;
        if !active.contains(&attestation.pub_key) {
            metrics::record_attestation_rejected("unknown_signer");
            return Err(GossipError::UnknownSigner(
                PeerId::from_public_key(&attestation.pub_key).to_string(),
            ));
        }
        let total = self.required_total(&item, &active).await?;

        let store = T::store(self);
        let handle = store.get_or_create(&item, Instant::now());
        let mut state = handle.lock().await;
        let added = match state.add_attestation(attestation, self.verifier.as_ref()) {
            Ok(added) => added,
            Err(e) => {
                if state.attestation_count() == 0 {
                    drop(state);
                    store.discard_unused(&item.key(), handle);
                }
                metrics::record_attestation_rejected(match e {
                    AttestationError::SignatureAlreadyPresent { .. } => "signature_already_present",
                    AttestationError::InvalidSignature { .. } => "invalid_signature",
                    AttestationError::Payload(_) => "payload",
                });
                return Err(e.into());
            }
        };
        if added {
            metrics::record_attestation_accepted(T::KIND.as_str());
        }

        self.forward_if_quorum(&mut state, total).await;
        Ok(added)
    }

    pub async fn handle_tx_attestation(&self, attest: Attest<TxObservation>) -> Result<bool, GossipError> {
        self.handle_attestation(attest).await
    }

    pub async fn handle_network_fee_attestation(&self, attest: Attest<NetworkFee>) -> Result<bool, GossipError> {
        self.handle_attestation(attest).await
    }

    pub async fn handle_solvency_attestation(&self, attest: Attest<Solvency>) -> Result<bool, GossipError> {
        self.handle_attestation(attest).await
    }

    pub async fn handle_errata_tx_attestation(&self, attest: Attest<ErrataTx>) -> Result<bool, GossipError> {
        self.handle_attestation(attest).await
    }

    /// Routes a vote of any kind.
    pub async fn handle_message(&self, message: AttestationMessage) -> Result<bool, GossipError> {
        match message {
            AttestationMessage::Tx(a) => self.handle_attestation(a).await,
            AttestationMessage::NetworkFee(a) => self.handle_attestation(a).await,
            AttestationMessage::Solvency(a) => self.handle_attestation(a).await,
            AttestationMessage::Errata(a) => self.handle_attestation(a).await,
        }
    }

    /// Quorum denominator: the fact's keysign party if it names one,
    /// otherwise the active validator set.
    async fn required_total<T: Attestable>(
        &self,
        item: &T,
        active: &HashSet<PublicKey>,
    ) -> Result<usize, GossipError> {
        match item.keysign_vault() {
            Some(vault) => self.keysign.party_size(vault).await,
            None => Ok(active.len()),
        }
    }

    /// Sends the unsent votes to consensus if the fact has quorum. Votes stay
    /// unsent on failure so a later reconcile retries them.
    async fn forward_if_quorum<T: Attestable>(
        &self,
        state: &mut crate::domain::AttestationState<T>,
        total: usize,
    ) -> bool {
        if !self
            .supermajority
            .has_supermajority(state.attestation_count(), total)
        {
            return false;
        }
        let unsent = state.unsent_attestations();
        if unsent.is_empty() {
            return false;
        }

        let now = Instant::now();
        state.mark_send_attempt(now);
        let votes = unsent.len();
        let fact = T::into_quorum_fact(Quorum::new(state.item().clone(), unsent));
        match self.consensus.send_quorum(fact).await {
            Ok(()) => {
                state.mark_attestations_sent(true, now);
                metrics::record_quorum_forward(T::KIND.as_str());
                debug!(kind = %T::KIND, votes, total, "Forwarded quorum to consensus");
                true
            }
            Err(e) => {
                warn!(kind = %T::KIND, votes, error = %e, "Quorum submission failed; will retry");
                false
            }
        }
    }

    fn log_rejection(&self, peer: PeerId, error: &GossipError) {
        match error {
            GossipError::Attestation(AttestationError::SignatureAlreadyPresent { pub_key }) => {
                warn!(peer = %peer, signer = %pub_key, "Conflicting vote signature");
            }
            other => debug!(peer = %peer, error = %other, "Rejected vote"),
        }
    }

    // =========================================================================
    // LOCAL VOTES
    // =========================================================================

    /// Signs `item`, records the vote locally and queues it for broadcast.
    pub async fn attest<T: GossipFact>(&self, item: T) -> Result<(), GossipError> {
        if !self.validators.is_active(&self.local_key).await? {
            return Err(GossipError::NotActiveValidator);
        }

        let payload = item.signable_payload()?;
        let attestation = Attestation::new(self.local_key, self.signer.sign_payload(&payload));
        let attest = Attest::new(item, attestation);

        self.handle_attestation(attest.clone()).await?;
        self.batcher.enqueue(T::into_attest_message(attest));
        Ok(())
    }

    pub async fn attest_observed_tx(&self, tx: TxObservation) -> Result<(), GossipError> {
        self.attest(tx).await
    }

    pub async fn attest_network_fee(&self, fee: NetworkFee) -> Result<(), GossipError> {
        self.attest(fee).await
    }

    pub async fn attest_solvency(&self, solvency: Solvency) -> Result<(), GossipError> {
        self.attest(solvency).await
    }

    pub async fn attest_errata_tx(&self, errata: ErrataTx) -> Result<(), GossipError> {
        self.attest(errata).await
    }

    // =========================================================================
    // COMMIT FEEDBACK
    // =========================================================================

    /// Marks the votes of a committed vote set. Returns how many were marked.
    pub async fn handle_commit(&self, fact: &QuorumFact) -> usize {
        match fact {
            QuorumFact::Tx(q) => self.commit_votes(q).await,
            QuorumFact::NetworkFee(q) => self.commit_votes(q).await,
            QuorumFact::Solvency(q) => self.commit_votes(q).await,
            QuorumFact::Errata(q) => self.commit_votes(q).await,
        }
    }

    async fn commit_votes<T: GossipFact>(&self, quorum: &Quorum<T>) -> usize {
        let Some(state) = T::store(self).get(&quorum.item.key()) else {
            return 0;
        };
        let marked = state
            .lock()
            .await
            .mark_attestations_committed(&quorum.attestations, Instant::now());
        debug!(kind = %T::KIND, marked, "Applied commit feedback");
        marked
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    /// Expires old states, re-sends late votes, and prunes the keysign and
    /// peer caches.
    pub async fn reconcile(&self) {
        let now = Instant::now();
        let active = match self.validators.active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Skipping reconcile: validator set unavailable");
                return;
            }
        };

        self.reconcile_store::<TxObservation>(&active, now).await;
        self.reconcile_store::<NetworkFee>(&active, now).await;
        self.reconcile_store::<Solvency>(&active, now).await;
        self.reconcile_store::<ErrataTx>(&active, now).await;

        let keysign = self.keysign.prune(now);
        let send_peers = self.send_peers.prune(now);
        let receive_peers = self.receive_peers.prune(now);
        if keysign + send_peers + receive_peers > 0 {
            debug!(keysign, send_peers, receive_peers, "Pruned idle caches");
        }
    }

    async fn reconcile_store<T: GossipFact>(&self, active: &HashSet<PublicKey>, now: Instant) {
        let store = T::store(self);
        let expired = store
            .prune_expired(
                self.config.late_observe_timeout(),
                self.config.non_quorum_timeout(),
                now,
            )
            .await;
        if expired > 0 {
            debug!(kind = %T::KIND, expired, "Pruned expired attestation states");
        }

        let min_interval = self.config.min_time_between_resends();
        for state in store.states() {
            let mut state = state.lock().await;
            if !state.should_send_late(min_interval, now) {
                continue;
            }
            match self.required_total(state.item(), active).await {
                Ok(total) => {
                    self.send_late(&mut state, total, now).await;
                }
                Err(e) => debug!(kind = %T::KIND, error = %e, "Cannot size quorum for late send"),
            }
        }
    }

    /// Delivers every unsent vote regardless of quorum. The consensus node
    /// merges sub-quorum sets with votes it receives from other validators.
    async fn send_late<T: Attestable>(
        &self,
        state: &mut crate::domain::AttestationState<T>,
        total: usize,
        now: Instant,
    ) -> bool {
        let unsent = state.unsent_attestations();
        if unsent.is_empty() {
            return false;
        }

        state.mark_send_attempt(now);
        let votes = unsent.len();
        let is_quorum = self
            .supermajority
            .has_supermajority(state.attestation_count(), total);
        let fact = T::into_quorum_fact(Quorum::new(state.item().clone(), unsent));
        match self.consensus.send_quorum(fact).await {
            Ok(()) => {
                state.mark_attestations_sent(is_quorum, now);
                if is_quorum {
                    metrics::record_quorum_forward(T::KIND.as_str());
                }
                debug!(kind = %T::KIND, votes, total, is_quorum, "Sent late votes to consensus");
                true
            }
            Err(e) => {
                warn!(kind = %T::KIND, votes, error = %e, "Late vote submission failed");
                false
            }
        }
    }

    // =========================================================================
    // BULK STATE SYNC
    // =========================================================================

    /// Deep copy of every tracked fact with all its votes.
    pub async fn state_snapshot(&self) -> QuorumState {
        QuorumState {
            txs: self.txs.snapshot().await,
            network_fees: self.network_fees.snapshot().await,
            solvencies: self.solvencies.snapshot().await,
            errata: self.errata.snapshot().await,
        }
    }

    /// Pulls `peer`'s outstanding votes. Returns the number of new votes.
    pub async fn request_state_from(&self, peer: PeerId) -> Result<usize, GossipError> {
        let mut stream = timeout(
            self.config.peer_timeout(),
            self.transport.open_stream(peer, ATTESTATION_STATE_PROTOCOL),
        )
        .await
        .map_err(|_| GossipError::Timeout(peer))??;

        let applied = AtomicUsize::new(0);
        let counter = &applied;
        let batches = sync::request_state(&mut stream, self.config.peer_timeout(), |batch| async move {
            counter.fetch_add(self.apply_state(peer, batch).await, Ordering::Relaxed);
        })
        .await?;

        let applied = applied.into_inner();
        debug!(peer = %peer, batches, applied, "State sync from peer complete");
        Ok(applied)
    }

    async fn apply_state(&self, peer: PeerId, state: QuorumState) -> usize {
        let mut applied = 0;
        for fact in state.into_facts() {
            applied += match fact {
                QuorumFact::Tx(q) => self.apply_quorum(peer, q).await,
                QuorumFact::NetworkFee(q) => self.apply_quorum(peer, q).await,
                QuorumFact::Solvency(q) => self.apply_quorum(peer, q).await,
                QuorumFact::Errata(q) => self.apply_quorum(peer, q).await,
            };
        }
        applied
    }

    async fn apply_quorum<T: GossipFact>(&self, peer: PeerId, quorum: Quorum<T>) -> usize {
        let mut applied = 0;
        for attestation in quorum.attestations {
            match self
                .handle_attestation(Attest::new(quorum.item.clone(), attestation))
                .await
            {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => self.log_rejection(peer, &e),
            }
        }
        applied
    }

    /// Asks up to `sync_peer_count` random active-validator peers for their
    /// state. Returns the total number of new votes.
    pub async fn sync_from_peers(self: &Arc<Self>) -> usize {
        let active = match self.validators.active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Skipping state sync: validator set unavailable");
                return 0;
            }
        };
        let local = self.transport.local_peer_id();
        let chosen: Vec<PeerId> = {
            let candidates: Vec<PeerId> = self
                .transport
                .connected_peers()
                .into_iter()
                .filter(|peer| *peer != local && active.contains(&peer.0))
                .collect();
            candidates
                .choose_multiple(&mut rand::thread_rng(), self.config.sync_peer_count)
                .copied()
                .collect()
        };

        let mut tasks = JoinSet::new();
        for peer in chosen {
            let gossip = self.clone();
            tasks.spawn(async move { (peer, gossip.request_state_from(peer).await) });
        }

        let mut total = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(applied))) => total += applied,
                Ok((peer, Err(e))) => warn!(peer = %peer, error = %e, "State sync with peer failed"),
                Err(e) => warn!(error = %e, "State sync task failed"),
            }
        }
        total
    }

    // =========================================================================
    // INBOUND STREAMS
    // =========================================================================

    async fn handle_batch_stream(&self, peer: PeerId, mut stream: BoxedStream) {
        let _permit = match self.receive_peers.acquire(peer).await {
            Ok(permit) => permit,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping inbound batch");
                return;
            }
        };

        let peer_timeout = self.config.peer_timeout();
        let batch: AttestationBatch = match timeout(peer_timeout, read_message(&mut stream)).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                debug!(peer = %peer, error = %e, "Failed to read attestation batch");
                return;
            }
            Err(_) => {
                debug!(peer = %peer, "Timed out reading attestation batch");
                return;
            }
        };
        match timeout(peer_timeout, write_ack(&mut stream, BATCH_ACK)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %peer, error = %e, "Failed to ack attestation batch"),
            Err(_) => debug!(peer = %peer, "Timed out acking attestation batch"),
        }
        drop(stream);

        let votes = batch.len();
        let mut added = 0;
        for message in batch.into_messages() {
            match self.handle_message(message).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => self.log_rejection(peer, &e),
            }
        }
        debug!(peer = %peer, votes, added, "Processed attestation batch");
    }

    async fn handle_state_stream(&self, peer: PeerId, mut stream: BoxedStream) {
        let _permit = match self.receive_peers.acquire(peer).await {
            Ok(permit) => permit,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping state request");
                return;
            }
        };

        let peer_timeout = self.config.peer_timeout();
        let request = match timeout(peer_timeout, read_frame(&mut stream)).await {
            Ok(Ok(frame)) => SyncFrame::decode(&frame),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(GossipError::Timeout(peer)),
        };
        match request {
            Ok(SyncFrame::SendState) => {}
            Ok(other) => {
                debug!(peer = %peer, frame = ?other, "Unexpected opening sync frame");
                return;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Failed to read state request");
                return;
            }
        }

        let state = self.state_snapshot().await;
        let items = state.len();
        match sync::serve_state(&mut stream, &state, self.config.sync_batch_size, peer_timeout).await {
            Ok(batches) => debug!(peer = %peer, items, batches, "Served state sync"),
            Err(e) => warn!(peer = %peer, error = %e, "Aborted state sync exchange"),
        }
    }

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================

    /// Starts the batcher, the reconcile loop and the startup sync.
    pub fn spawn_background(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.batcher.clone().run(shutdown.clone())),
            tokio::spawn(self.clone().run_reconcile(shutdown.clone())),
            tokio::spawn(self.clone().run_startup_sync(shutdown)),
        ]
    }

    async fn run_reconcile(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.reconcile_interval(), "Attestation reconcile loop started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Attestation reconcile loop shutting down");
                    break;
                }
                _ = ticker.tick() => self.reconcile().await,
            }
        }
    }

    async fn run_startup_sync(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = sleep(self.config.sync_delay()) => {}
        }
        let applied = self.sync_from_peers().await;
        info!(applied, "Startup state sync finished");
    }
}

#[async_trait]
impl StreamHandler for AttestationGossip {
    async fn handle_stream(&self, protocol: &str, peer: PeerId, stream: BoxedStream) {
        match protocol {
            BATCHED_ATTESTATIONS_PROTOCOL => self.handle_batch_stream(peer, stream).await,
            ATTESTATION_STATE_PROTOCOL => self.handle_state_stream(peer, stream).await,
            other => warn!(peer = %peer, protocol = other, "Unknown stream protocol"),
        }
    }
}
