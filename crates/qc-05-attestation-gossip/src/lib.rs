//! # Attestation Gossip Subsystem (qc-05)
//!
//! Collects validator votes on external-chain facts, decides when a fact has
//! reached quorum, and hands quorum-strength vote sets to the local consensus
//! node.
//!
//! ## Architecture Role
//!
//! ```text
//! [Chain observer] ──attest_*()──→ [AttestationGossip] ──send_quorum()──→ [Consensus (8)]
//!                                     │          ↑
//!                        enqueue vote ↓          │ handle_*_attestation()
//!                           [AttestationBatcher] │
//!                                     │          │
//!                      batched fan-out ↓          │ inbound streams / bulk sync
//!                             ┌───────┴──────────┴──┐
//!                             ↓                     ↓
//!                        [Peer A]              [Peer B] ...
//! ```
//!
//! ## Guarantees
//!
//! - Every vote is verified against the fact's canonical payload before it is
//!   counted; a second, different signature from the same validator is an
//!   error, never silently dropped.
//! - Each fact's state is mutated under its own lock; the per-kind map lock
//!   only guards insertion and removal.
//! - Peer sends are bounded per peer and never block sends to other peers.

pub mod adapters;
pub mod batcher;
pub mod domain;
pub mod metrics;
pub mod peer_manager;
pub mod ports;
pub mod service;
pub mod sync;
pub mod validators;

pub use adapters::{MemoryNetwork, MemoryTransport};
pub use batcher::AttestationBatcher;
pub use domain::*;
pub use peer_manager::{PeerManager, PeerPermit};
pub use ports::outbound::*;
pub use service::{AttestationGossip, GossipDependencies, GossipFact};
pub use validators::{ActiveValidatorCache, KeysignPartyCache};

/// Protocol id for live vote batches.
pub const BATCHED_ATTESTATIONS_PROTOCOL: &str = "/quorum/batched-attestations/1.0.0";

/// Protocol id for bulk state sync.
pub const ATTESTATION_STATE_PROTOCOL: &str = "/quorum/attestation-state/1.0.0";
