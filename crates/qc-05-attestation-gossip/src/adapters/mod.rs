//! Transport adapters shipped with the gossip crate.

mod memory_transport;

pub use memory_transport::{MemoryNetwork, MemoryTransport};
