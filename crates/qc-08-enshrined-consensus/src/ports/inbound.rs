//! Driving ports: how the ledger side talks to the inject cache.

use shared_types::QuorumFact;

/// Source of injected transactions for block proposals.
pub trait InjectSource: Send + Sync {
    /// Serialized inject transactions fitting in `max_bytes`, and their total
    /// size.
    fn proposal_inject_txs(&self, max_bytes: usize) -> (Vec<Vec<u8>>, usize);
}

/// Receiver of ledger confirmations for delivered quorum facts.
pub trait ConfirmationSink: Send + Sync {
    /// Returns the number of pending votes removed.
    fn confirm(&self, fact: &QuorumFact, height: u64) -> usize;
}
