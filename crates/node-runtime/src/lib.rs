//! # Quorum-Chain Node Runtime
//!
//! Assembles the attestation gossip (qc-05) and enshrined consensus (qc-08)
//! subsystems into one validator process.
//!
//! - [`container`]: configuration and component construction
//! - [`adapters`]: TCP peer transport, consensus clients, static validator set
//! - [`wiring`]: commit feedback from consensus into gossip
//! - [`logging`]: tracing subscriber setup

pub mod adapters;
pub mod container;
pub mod logging;
pub mod wiring;

pub use container::config::{ConfigError, NodeConfig, CONFIG_PATH_ENV};
pub use container::{ContainerError, NodeContainer};
