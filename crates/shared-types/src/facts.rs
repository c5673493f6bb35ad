//! # Attestable Facts
//!
//! The four kinds of external observation validators vote on, and the
//! [`Attestable`] contract that lets the vote machinery treat them uniformly.
//!
//! | Kind | Item | Map key |
//! |------|------|---------|
//! | Observed tx | [`TxObservation`] | [`TxKey`] |
//! | Network fee | [`NetworkFee`] | the fee itself |
//! | Solvency | [`Solvency`] | content hash |
//! | Errata | [`ErrataTx`] | the errata itself |

use crate::entities::{Coin, Hash};
use crate::envelope::{Attest, AttestationMessage, Quorum, QuorumFact};
use crate::errors::TypesError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hash as StdHash;

/// Discriminates the four fact kinds in logs, metrics and event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FactKind {
    ObservedTx = 1,
    NetworkFee = 2,
    Solvency = 3,
    ErrataTx = 4,
}

impl FactKind {
    /// All kinds in proposal order.
    pub const ALL: [FactKind; 4] = [
        FactKind::ObservedTx,
        FactKind::NetworkFee,
        FactKind::Solvency,
        FactKind::ErrataTx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::ObservedTx => "observed_tx",
            FactKind::NetworkFee => "network_fee",
            FactKind::Solvency => "solvency",
            FactKind::ErrataTx => "errata_tx",
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fact validators can vote on.
///
/// Implementors only describe identity and payload; vote bookkeeping lives in
/// the gossip and consensus crates, which are generic over this trait.
pub trait Attestable:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Identity used to group votes on the same fact.
    type Key: Clone + Eq + StdHash + fmt::Debug + Send + Sync + 'static;

    /// Which of the four fact kinds this is.
    const KIND: FactKind;

    /// Returns the grouping key for this fact.
    fn key(&self) -> Self::Key;

    /// Canonical bytes every validator signs.
    ///
    /// Prefixed with the kind tag so a signature over one fact kind can never
    /// be replayed as a vote on another.
    fn signable_payload(&self) -> Result<Vec<u8>, TypesError> {
        let mut payload = vec![Self::KIND as u8];
        payload.extend(bincode::serialize(self)?);
        Ok(payload)
    }

    /// Vault whose keysign party (rather than the active validator set)
    /// decides quorum for this fact, if any.
    fn keysign_vault(&self) -> Option<&str> {
        None
    }

    /// Wraps a single vote into the gossip message enum.
    fn into_attest_message(attest: Attest<Self>) -> AttestationMessage;

    /// Wraps a vote set into the quorum fact enum.
    fn into_quorum_fact(quorum: Quorum<Self>) -> QuorumFact;
}

// =============================================================================
// OBSERVED TRANSACTIONS
// =============================================================================

/// A transaction seen on an external chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservedTx {
    /// External chain identifier, e.g. `BTC`.
    pub chain: String,
    /// Transaction id on that chain.
    pub tx_id: String,
    pub from_address: String,
    pub to_address: String,
    pub coins: Vec<Coin>,
    pub gas: Vec<Coin>,
    pub memo: String,
    /// Height the transaction was seen at.
    pub block_height: u64,
    /// Height at which the observation counts as final.
    pub finalise_height: u64,
    /// Vault public key that sent or received the transaction.
    pub observed_pub_key: String,
}

impl ObservedTx {
    /// True once the observation height has reached the finalise height.
    pub fn is_finalised(&self) -> bool {
        self.block_height >= self.finalise_height
    }

    /// Hash of every observed field.
    ///
    /// Two observations of the same tx id that differ in any content (amount,
    /// memo, heights) hash differently and therefore vote separately.
    pub fn content_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.chain.as_bytes());
        hasher.update(self.tx_id.as_bytes());
        hasher.update(self.from_address.as_bytes());
        hasher.update(self.to_address.as_bytes());
        for coin in self.coins.iter().chain(self.gas.iter()) {
            hasher.update(coin.asset.as_bytes());
            hasher.update(coin.amount.to_le_bytes());
        }
        hasher.update(self.memo.as_bytes());
        hasher.update(self.block_height.to_le_bytes());
        hasher.update(self.finalise_height.to_le_bytes());
        hasher.update(self.observed_pub_key.as_bytes());
        hasher.finalize().into()
    }
}

/// The attestable item for an observed transaction: the tx plus its direction
/// and whether it may be attested before the vault is known to have signed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxObservation {
    pub tx: ObservedTx,
    pub inbound: bool,
    pub allow_future_observation: bool,
}

impl TxObservation {
    pub fn new(tx: ObservedTx, inbound: bool, allow_future_observation: bool) -> Self {
        Self {
            tx,
            inbound,
            allow_future_observation,
        }
    }
}

/// Composite identity of an observed transaction.
///
/// Distinguishes observations sharing a tx id across direction, content,
/// future-observation permission and finality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxKey {
    pub chain: String,
    pub tx_id: String,
    pub content_hash: Hash,
    pub inbound: bool,
    pub allow_future_observation: bool,
    pub finalised: bool,
}

impl Attestable for TxObservation {
    type Key = TxKey;
    const KIND: FactKind = FactKind::ObservedTx;

    fn key(&self) -> TxKey {
        TxKey {
            chain: self.tx.chain.clone(),
            tx_id: self.tx.tx_id.clone(),
            content_hash: self.tx.content_hash(),
            inbound: self.inbound,
            allow_future_observation: self.allow_future_observation,
            finalised: self.tx.is_finalised(),
        }
    }

    fn keysign_vault(&self) -> Option<&str> {
        self.allow_future_observation
            .then_some(self.tx.observed_pub_key.as_str())
    }

    fn into_attest_message(attest: Attest<Self>) -> AttestationMessage {
        AttestationMessage::Tx(attest)
    }

    fn into_quorum_fact(quorum: Quorum<Self>) -> QuorumFact {
        QuorumFact::Tx(quorum)
    }
}

// =============================================================================
// NETWORK FEES
// =============================================================================

/// Observed fee conditions of an external chain at a height.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkFee {
    pub chain: String,
    pub height: u64,
    /// Typical transaction size in the chain's unit (bytes, gas).
    pub transaction_size: u64,
    /// Fee rate per size unit.
    pub transaction_rate: u64,
}

impl Attestable for NetworkFee {
    type Key = NetworkFee;
    const KIND: FactKind = FactKind::NetworkFee;

    fn key(&self) -> NetworkFee {
        self.clone()
    }

    fn into_attest_message(attest: Attest<Self>) -> AttestationMessage {
        AttestationMessage::NetworkFee(attest)
    }

    fn into_quorum_fact(quorum: Quorum<Self>) -> QuorumFact {
        QuorumFact::NetworkFee(quorum)
    }
}

// =============================================================================
// SOLVENCY
// =============================================================================

/// A vault's observed on-chain balances (solvency proof).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Solvency {
    /// Content hash of the remaining fields, see [`Solvency::compute_id`].
    pub id: Hash,
    pub chain: String,
    pub pub_key: String,
    pub coins: Vec<Coin>,
    pub height: u64,
}

impl Solvency {
    /// Builds a solvency fact with its content id filled in.
    pub fn new(chain: impl Into<String>, pub_key: impl Into<String>, coins: Vec<Coin>, height: u64) -> Self {
        let mut solvency = Self {
            id: [0u8; 32],
            chain: chain.into(),
            pub_key: pub_key.into(),
            coins,
            height,
        };
        solvency.id = solvency.compute_id();
        solvency
    }

    pub fn compute_id(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.chain.as_bytes());
        hasher.update(self.pub_key.as_bytes());
        for coin in &self.coins {
            hasher.update(coin.asset.as_bytes());
            hasher.update(coin.amount.to_le_bytes());
        }
        hasher.update(self.height.to_le_bytes());
        hasher.finalize().into()
    }
}

impl Attestable for Solvency {
    type Key = Hash;
    const KIND: FactKind = FactKind::Solvency;

    fn key(&self) -> Hash {
        self.id
    }

    fn into_attest_message(attest: Attest<Self>) -> AttestationMessage {
        AttestationMessage::Solvency(attest)
    }

    fn into_quorum_fact(quorum: Quorum<Self>) -> QuorumFact {
        QuorumFact::Solvency(quorum)
    }
}

// =============================================================================
// ERRATA
// =============================================================================

/// Retraction of a previously observed transaction (e.g. after a reorg).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrataTx {
    pub chain: String,
    pub tx_id: String,
}

impl Attestable for ErrataTx {
    type Key = ErrataTx;
    const KIND: FactKind = FactKind::ErrataTx;

    fn key(&self) -> ErrataTx {
        self.clone()
    }

    fn into_attest_message(attest: Attest<Self>) -> AttestationMessage {
        AttestationMessage::Errata(attest)
    }

    fn into_quorum_fact(quorum: Quorum<Self>) -> QuorumFact {
        QuorumFact::Errata(quorum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> ObservedTx {
        ObservedTx {
            chain: "BTC".into(),
            tx_id: "abc123".into(),
            from_address: "bc1qsender".into(),
            to_address: "bc1qvault".into(),
            coins: vec![Coin::new("BTC.BTC", 100_000)],
            gas: vec![Coin::new("BTC.BTC", 250)],
            memo: "SWAP:ETH.ETH".into(),
            block_height: 800_000,
            finalise_height: 800_002,
            observed_pub_key: "vaultpub".into(),
        }
    }

    #[test]
    fn test_tx_key_distinguishes_direction() {
        let inbound = TxObservation::new(sample_tx(), true, false);
        let outbound = TxObservation::new(sample_tx(), false, false);
        assert_ne!(inbound.key(), outbound.key());
        assert_eq!(inbound.key().tx_id, outbound.key().tx_id);
    }

    #[test]
    fn test_tx_key_distinguishes_finality() {
        let pending = TxObservation::new(sample_tx(), true, false);
        let mut final_tx = sample_tx();
        final_tx.block_height = final_tx.finalise_height;
        let finalised = TxObservation::new(final_tx, true, false);

        assert!(!pending.key().finalised);
        assert!(finalised.key().finalised);
        assert_ne!(pending.key(), finalised.key());
    }

    #[test]
    fn test_signable_payload_is_kind_tagged() {
        let fee = NetworkFee {
            chain: "ETH".into(),
            height: 10,
            transaction_size: 80_000,
            transaction_rate: 30,
        };
        let payload = fee.signable_payload().unwrap();
        assert_eq!(payload[0], FactKind::NetworkFee as u8);
        assert_eq!(payload, fee.clone().signable_payload().unwrap());
    }

    #[test]
    fn test_keysign_vault_only_for_future_observation() {
        let plain = TxObservation::new(sample_tx(), false, false);
        let future = TxObservation::new(sample_tx(), false, true);
        assert_eq!(plain.keysign_vault(), None);
        assert_eq!(future.keysign_vault(), Some("vaultpub"));
    }

    #[test]
    fn test_solvency_id_tracks_content() {
        let a = Solvency::new("BTC", "vault", vec![Coin::new("BTC.BTC", 5)], 7);
        let b = Solvency::new("BTC", "vault", vec![Coin::new("BTC.BTC", 6)], 7);
        assert_eq!(a.key(), a.compute_id());
        assert_ne!(a.key(), b.key());
    }
}
