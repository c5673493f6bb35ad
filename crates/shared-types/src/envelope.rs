//! # Vote Envelopes
//!
//! Wire forms wrapping facts with their votes.
//!
//! - [`Attest<T>`]: one fact plus one attestation (live gossip).
//! - [`Quorum<T>`]: one fact plus every attestation collected so far (local
//!   RPC submission and bulk state sync).
//! - [`AttestationBatch`] / [`QuorumState`]: containers grouping many of the
//!   above by fact kind.

use crate::entities::Attestation;
use crate::facts::{ErrataTx, FactKind, NetworkFee, Solvency, TxObservation};
use serde::{Deserialize, Serialize};

/// A single vote on a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attest<T> {
    pub item: T,
    pub attestation: Attestation,
}

impl<T> Attest<T> {
    pub fn new(item: T, attestation: Attestation) -> Self {
        Self { item, attestation }
    }
}

/// A fact with its full attestation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum<T> {
    pub item: T,
    pub attestations: Vec<Attestation>,
}

impl<T> Quorum<T> {
    pub fn new(item: T, attestations: Vec<Attestation>) -> Self {
        Self { item, attestations }
    }

    /// True if an identical (pubkey, signature) vote is already present.
    pub fn contains(&self, attestation: &Attestation) -> bool {
        self.attestations.iter().any(|a| a == attestation)
    }
}

pub type AttestTx = Attest<TxObservation>;
pub type AttestNetworkFee = Attest<NetworkFee>;
pub type AttestSolvency = Attest<Solvency>;
pub type AttestErrataTx = Attest<ErrataTx>;

pub type QuorumTx = Quorum<TxObservation>;
pub type QuorumNetworkFee = Quorum<NetworkFee>;
pub type QuorumSolvency = Quorum<Solvency>;
pub type QuorumErrataTx = Quorum<ErrataTx>;

/// A single vote of any fact kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationMessage {
    Tx(AttestTx),
    NetworkFee(AttestNetworkFee),
    Solvency(AttestSolvency),
    Errata(AttestErrataTx),
}

impl AttestationMessage {
    pub fn kind(&self) -> FactKind {
        match self {
            AttestationMessage::Tx(_) => FactKind::ObservedTx,
            AttestationMessage::NetworkFee(_) => FactKind::NetworkFee,
            AttestationMessage::Solvency(_) => FactKind::Solvency,
            AttestationMessage::Errata(_) => FactKind::ErrataTx,
        }
    }
}

/// A vote set of any fact kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumFact {
    Tx(QuorumTx),
    NetworkFee(QuorumNetworkFee),
    Solvency(QuorumSolvency),
    Errata(QuorumErrataTx),
}

impl QuorumFact {
    pub fn kind(&self) -> FactKind {
        match self {
            QuorumFact::Tx(_) => FactKind::ObservedTx,
            QuorumFact::NetworkFee(_) => FactKind::NetworkFee,
            QuorumFact::Solvency(_) => FactKind::Solvency,
            QuorumFact::Errata(_) => FactKind::ErrataTx,
        }
    }

    pub fn attestations(&self) -> &[Attestation] {
        match self {
            QuorumFact::Tx(q) => &q.attestations,
            QuorumFact::NetworkFee(q) => &q.attestations,
            QuorumFact::Solvency(q) => &q.attestations,
            QuorumFact::Errata(q) => &q.attestations,
        }
    }
}

/// Outbound votes pending broadcast, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationBatch {
    pub txs: Vec<AttestTx>,
    pub network_fees: Vec<AttestNetworkFee>,
    pub solvencies: Vec<AttestSolvency>,
    pub errata: Vec<AttestErrataTx>,
}

impl AttestationBatch {
    pub fn len(&self) -> usize {
        self.txs.len() + self.network_fees.len() + self.solvencies.len() + self.errata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties every list while keeping their allocations.
    pub fn clear(&mut self) {
        self.txs.clear();
        self.network_fees.clear();
        self.solvencies.clear();
        self.errata.clear();
    }

    /// Flattens the batch into individual messages.
    pub fn into_messages(self) -> impl Iterator<Item = AttestationMessage> {
        let txs = self.txs.into_iter().map(AttestationMessage::Tx);
        let fees = self.network_fees.into_iter().map(AttestationMessage::NetworkFee);
        let solvencies = self.solvencies.into_iter().map(AttestationMessage::Solvency);
        let errata = self.errata.into_iter().map(AttestationMessage::Errata);
        txs.chain(fees).chain(solvencies).chain(errata)
    }
}

/// One chunk of a node's outstanding vote set, as exchanged by bulk sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumState {
    pub txs: Vec<QuorumTx>,
    pub network_fees: Vec<QuorumNetworkFee>,
    pub solvencies: Vec<QuorumSolvency>,
    pub errata: Vec<QuorumErrataTx>,
}

impl QuorumState {
    pub fn len(&self) -> usize {
        self.txs.len() + self.network_fees.len() + self.solvencies.len() + self.errata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the largest per-kind list.
    pub fn max_kind_len(&self) -> usize {
        self.txs
            .len()
            .max(self.network_fees.len())
            .max(self.solvencies.len())
            .max(self.errata.len())
    }

    /// Returns the `index`-th chunk, taking up to `per_kind` items of each kind.
    pub fn chunk(&self, index: usize, per_kind: usize) -> QuorumState {
        fn slice<T: Clone>(items: &[T], index: usize, per_kind: usize) -> Vec<T> {
            let start = index.saturating_mul(per_kind).min(items.len());
            let end = start.saturating_add(per_kind).min(items.len());
            items[start..end].to_vec()
        }

        QuorumState {
            txs: slice(&self.txs, index, per_kind),
            network_fees: slice(&self.network_fees, index, per_kind),
            solvencies: slice(&self.solvencies, index, per_kind),
            errata: slice(&self.errata, index, per_kind),
        }
    }

    /// Flattens the state into individual quorum facts.
    pub fn into_facts(self) -> impl Iterator<Item = QuorumFact> {
        let txs = self.txs.into_iter().map(QuorumFact::Tx);
        let fees = self.network_fees.into_iter().map(QuorumFact::NetworkFee);
        let solvencies = self.solvencies.into_iter().map(QuorumFact::Solvency);
        let errata = self.errata.into_iter().map(QuorumFact::Errata);
        txs.chain(fees).chain(solvencies).chain(errata)
    }
}
