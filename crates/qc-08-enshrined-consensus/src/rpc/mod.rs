//! # Loopback RPC
//!
//! The local gossip process submits quorum vote sets and subscribes to commit
//! notifications over a TCP connection carrying length-framed bincode
//! messages.
//!
//! ```text
//! client                         server
//!   ── Submit(QuorumFact) ──────→
//!   ←───────────── Ack { added } ─   (or Error)
//!
//!   ── Subscribe(types) ────────→
//!   ←─────────────── Subscribed ─
//!   ←──────────── Event(event) ──   ... until either side closes
//! ```
//!
//! A connection that subscribes is dedicated to the event stream.

mod client;
mod server;

pub use client::{RpcClient, RpcSubscription};
pub use server::LocalRpcServer;

use serde::{Deserialize, Serialize};
use shared_bus::{ConsensusEvent, EventType};
use shared_types::QuorumFact;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    Submit(QuorumFact),
    Subscribe(Vec<EventType>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    /// The vote set was accepted; `added` votes were new to the cache.
    Ack { added: usize },
    Subscribed,
    Event(ConsensusEvent),
    Error(String),
}

#[cfg(test)]
mod tests;
