//! # Ledger Boundary Types
//!
//! The minimal transaction model the admission hooks reason about. Quorum
//! facts only ever enter the ledger wrapped in an [`TxKind::Inject`]
//! transaction built by the proposer.

use crate::entities::{Address, Coin};
use crate::envelope::QuorumFact;
use crate::errors::TypesError;
use serde::{Deserialize, Serialize};

/// Placeholder account that "signs" injected transactions.
///
/// No key exists for it; inject transactions are authorized by the proposer
/// path, not by a signature.
pub const INJECT_SIGNER: Address = [0u8; 20];

/// How a transaction entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    /// Submitted by a user through the mempool.
    Standard,
    /// Wrapped by the proposer around exactly one quorum fact.
    Inject,
}

/// A single ledger message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerMsg {
    /// Ordinary value transfer.
    Send {
        from: Address,
        to: Address,
        coins: Vec<Coin>,
    },
    /// A quorum-strength fact with its attestations.
    Quorum(QuorumFact),
}

impl LedgerMsg {
    pub fn as_quorum(&self) -> Option<&QuorumFact> {
        match self {
            LedgerMsg::Quorum(fact) => Some(fact),
            LedgerMsg::Send { .. } => None,
        }
    }
}

/// A transaction as seen by admission control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTx {
    pub kind: TxKind,
    pub signer: Address,
    pub msgs: Vec<LedgerMsg>,
}

impl LedgerTx {
    pub fn standard(signer: Address, msgs: Vec<LedgerMsg>) -> Self {
        Self {
            kind: TxKind::Standard,
            signer,
            msgs,
        }
    }

    /// Wraps one quorum fact for proposer-side injection.
    pub fn inject(fact: QuorumFact) -> Self {
        Self {
            kind: TxKind::Inject,
            signer: INJECT_SIGNER,
            msgs: vec![LedgerMsg::Quorum(fact)],
        }
    }

    /// Every quorum fact carried by this transaction.
    pub fn quorum_facts(&self) -> impl Iterator<Item = &QuorumFact> {
        self.msgs.iter().filter_map(LedgerMsg::as_quorum)
    }

    pub fn encode(&self) -> Result<Vec<u8>, TypesError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TypesError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Phase in which the ledger evaluates a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecMode {
    /// Mempool admission.
    Check,
    /// Mempool re-validation after a block.
    ReCheck,
    /// Dry run, e.g. gas estimation.
    Simulate,
    PrepareProposal,
    ProcessProposal,
    /// Actual block delivery; the only mode with lasting effects.
    Deliver,
}
