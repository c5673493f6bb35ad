//! # Shared Types Crate
//!
//! This crate contains the types every part of the attestation pipeline agrees
//! on: who voted ([`Attestation`]), what they voted on (the four attestable
//! facts), and how votes travel ([`Attest`], [`Quorum`] and the stream framing
//! in [`wire`]).
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: All cross-crate types are defined here.
//! - **Canonical Payloads**: Every fact exposes one signable byte payload via
//!   [`Attestable::signable_payload`]; signatures are only ever checked
//!   against it.
//! - **Identity Keys**: Each fact type defines its own map key so that
//!   otherwise-identical observations (direction, finality) stay distinct.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod facts;
pub mod ledger;
pub mod wire;

pub use entities::*;
pub use envelope::*;
pub use errors::*;
pub use facts::*;
pub use ledger::*;
