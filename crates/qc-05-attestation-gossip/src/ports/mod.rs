//! Ports for the gossip subsystem.
//!
//! Everything outside vote bookkeeping (the peer transport, the local
//! consensus node, the validator set and keysign parties) is reached through
//! the traits in [`outbound`].

pub mod outbound;
