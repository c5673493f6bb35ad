//! # Domain Layer for Attestation Gossip
//!
//! Vote bookkeeping with no I/O: the per-fact state machine, its object pool,
//! the quorum predicate and the configuration surface.
//!
//! Time is always passed in explicitly so every policy can be tested without
//! sleeping.

mod attestation_state;
mod config;
mod error;
mod pool;
mod supermajority;

pub use attestation_state::*;
pub use config::*;
pub use error::*;
pub use pool::*;
pub use supermajority::*;
