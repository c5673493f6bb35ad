//! # Commit Events
//!
//! One event type per fact kind. The payload is the bincode-encoded
//! [`QuorumFact`] holding exactly the attestations that were committed.

use serde::{Deserialize, Serialize};
use shared_types::{FactKind, QuorumFact, TypesError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Kinds of notification a subscriber can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    QuorumTxCommitted,
    QuorumNetworkFeeCommitted,
    QuorumSolvencyCommitted,
    QuorumErrataTxCommitted,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::QuorumTxCommitted,
        EventType::QuorumNetworkFeeCommitted,
        EventType::QuorumSolvencyCommitted,
        EventType::QuorumErrataTxCommitted,
    ];

    /// The commit event emitted for a fact kind.
    pub fn committed(kind: FactKind) -> Self {
        match kind {
            FactKind::ObservedTx => EventType::QuorumTxCommitted,
            FactKind::NetworkFee => EventType::QuorumNetworkFeeCommitted,
            FactKind::Solvency => EventType::QuorumSolvencyCommitted,
            FactKind::ErrataTx => EventType::QuorumErrataTxCommitted,
        }
    }
}

/// A notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusEvent {
    pub event_type: EventType,
    pub payload: Vec<u8>,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Ledger height the commit happened at.
    pub height: u64,
}

impl ConsensusEvent {
    /// Builds the commit notification for a confirmed vote set.
    pub fn committed(fact: &QuorumFact, height: u64) -> Result<Self, TypesError> {
        Ok(Self {
            event_type: EventType::committed(fact.kind()),
            payload: bincode::serialize(fact)?,
            timestamp: now_ms(),
            height,
        })
    }

    /// Decodes the committed vote set.
    pub fn decode_fact(&self) -> Result<QuorumFact, TypesError> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Selects which events a subscription receives. Empty means everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn types(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn matches(&self, event: &ConsensusEvent) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Attestation, ErrataTx, Quorum};

    fn errata_fact() -> QuorumFact {
        QuorumFact::Errata(Quorum::new(
            ErrataTx {
                chain: "BTC".into(),
                tx_id: "t".into(),
            },
            vec![Attestation::new([1; 32], [2; 64])],
        ))
    }

    #[test]
    fn test_committed_event_carries_fact() {
        let fact = errata_fact();
        let event = ConsensusEvent::committed(&fact, 42).unwrap();
        assert_eq!(event.event_type, EventType::QuorumErrataTxCommitted);
        assert_eq!(event.height, 42);
        assert_eq!(event.decode_fact().unwrap(), fact);
    }

    #[test]
    fn test_filter_matching() {
        let event = ConsensusEvent::committed(&errata_fact(), 1).unwrap();
        assert!(EventFilter::all().matches(&event));
        assert!(EventFilter::types(vec![EventType::QuorumErrataTxCommitted]).matches(&event));
        assert!(!EventFilter::types(vec![EventType::QuorumTxCommitted]).matches(&event));
    }
}
