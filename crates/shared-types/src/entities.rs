//! # Core Entities
//!
//! Identity and vote primitives shared by gossip, consensus and the runtime.
//!
//! ## Clusters
//!
//! - **Identity**: `PublicKey`, `NodeId` / `PeerId`, `Address`
//! - **Votes**: [`Attestation`]
//! - **Assets**: [`Coin`]

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;

/// A 32-byte hash (SHA-256).
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// A 20-byte ledger account address.
pub type Address = [u8; 20];

/// Unique identifier for a node in the network.
///
/// Validators use their attestation public key as node identity, so a peer
/// can be matched against the active validator set without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct NodeId(pub [u8; 32]);

/// A peer identifier (alias for `NodeId` in peer contexts).
pub type PeerId = NodeId;

impl NodeId {
    /// Creates a node id from a validator public key.
    pub fn from_public_key(pub_key: &PublicKey) -> Self {
        Self(*pub_key)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// One validator's vote on a fact's canonical signable payload.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attestation {
    /// The voting validator's public key.
    pub pub_key: PublicKey,
    /// Signature over [`crate::Attestable::signable_payload`].
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl Attestation {
    /// Creates a new attestation.
    pub fn new(pub_key: PublicKey, signature: Signature) -> Self {
        Self { pub_key, signature }
    }
}

/// An amount of a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// Asset identifier, e.g. `BTC.BTC`.
    pub asset: String,
    /// Amount in the asset's base units.
    pub amount: u64,
}

impl Coin {
    pub fn new(asset: impl Into<String>, amount: u64) -> Self {
        Self {
            asset: asset.into(),
            amount,
        }
    }
}
