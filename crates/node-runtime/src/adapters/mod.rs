//! Adapters binding the subsystem ports to real infrastructure.

pub mod consensus;
pub mod tcp_transport;
pub mod validators;

pub use consensus::{LocalConsensusClient, RpcConsensusClient};
pub use tcp_transport::{StreamHello, TcpPeerListener, TcpPeerTransport};
pub use validators::{StaticKeysignParties, StaticValidatorSet};
