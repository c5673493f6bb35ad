//! # Shared Crypto - Attestation Signatures
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `signatures` | Ed25519 | Validator key pairs |
//! | `attestation` | Ed25519 | Signing and verifying votes on facts |
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency when signing
//! - **Injected verification**: vote verification is a trait object handed
//!   to constructors, so tests swap in fakes without process-wide state

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attestation;
pub mod errors;
pub mod signatures;

// Re-exports
pub use attestation::{AttestationSigner, AttestationVerifier, Ed25519Verifier};
pub use errors::CryptoError;
pub use signatures::{verify_ed25519, Ed25519KeyPair};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
