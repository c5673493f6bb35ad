//! # Enshrined Consensus Subsystem (qc-08)
//!
//! The consensus-side half of the attestation pipeline: quorum-strength vote
//! sets wait here until a proposer injects them into a block, and leave once
//! the ledger confirms them.
//!
//! ## Architecture Role
//!
//! ```text
//! [Gossip (5)] ──Submit──→ [LocalRpcServer] ──add_quorum──→ [EnshrinedBifrost]
//!                                                              │   ↑
//!                         proposal_inject_txs (priority read)  │   │ confirm
//!                                                              ↓   │
//!                                  [Proposer] ──inject txs──→ [AdmissionControl]
//!                                                                  │
//!                                            commit events ←───────┘
//!                                       [Event Bus] ──Event──→ [Subscribers]
//! ```
//!
//! ## Ledger Rules
//!
//! - Quorum messages only ever enter the ledger inside an inject
//!   transaction, and inject transactions are only admitted at delivery.
//! - A confirmation removes exactly the confirmed votes; late gossip for
//!   recently confirmed votes is ignored.

pub mod admission;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod rpc;
pub mod service;

pub use admission::{ante_check, AdmissionControl};
pub use domain::*;
pub use ports::{ConfirmationSink, InjectSource};
pub use rpc::{LocalRpcServer, RpcClient, RpcRequest, RpcResponse, RpcSubscription};
pub use service::block_loop::{BlockSummary, LocalBlockProducer};
pub use service::{CachedFact, EnshrinedBifrost, InjectCaches};
