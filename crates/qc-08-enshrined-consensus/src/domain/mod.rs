//! # Domain Layer for Enshrined Consensus
//!
//! The pending-item cache, the priority lock that guards it, and the
//! configuration and error types. Nothing here does I/O.

mod config;
mod error;
mod inject_cache;
mod priority_lock;

pub use config::*;
pub use error::*;
pub use inject_cache::*;
pub use priority_lock::*;
