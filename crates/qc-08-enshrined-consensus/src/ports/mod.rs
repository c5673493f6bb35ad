//! Ports for the enshrined consensus subsystem.

pub mod inbound;

pub use inbound::*;
