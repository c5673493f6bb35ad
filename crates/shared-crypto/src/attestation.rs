//! # Attestation Signing and Verification
//!
//! Seams between the vote machinery and the key material. Gossip signs local
//! votes through [`AttestationSigner`] and checks every incoming vote through
//! [`AttestationVerifier`]; both are injected at construction time.

use crate::signatures::{verify_ed25519, Ed25519KeyPair};
use crate::CryptoError;
use shared_types::{Attestable, Attestation, PublicKey, Signature};

/// Verifies a vote signature over a fact's signable payload.
pub trait AttestationVerifier: Send + Sync {
    /// Returns `Ok(())` iff `signature` is `pub_key`'s signature over `payload`.
    fn verify(
        &self,
        pub_key: &PublicKey,
        payload: &[u8],
        signature: &Signature,
    ) -> Result<(), CryptoError>;
}

/// Produces this node's votes.
pub trait AttestationSigner: Send + Sync {
    /// Public key votes are issued under.
    fn public_key(&self) -> PublicKey;

    /// Signs a canonical payload.
    fn sign_payload(&self, payload: &[u8]) -> Signature;

    /// Signs `item` and returns the resulting attestation.
    fn attest<T: Attestable>(&self, item: &T) -> Result<Attestation, shared_types::TypesError>
    where
        Self: Sized,
    {
        let payload = item.signable_payload()?;
        Ok(Attestation::new(self.public_key(), self.sign_payload(&payload)))
    }
}

/// Production verifier backed by `ed25519-dalek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl AttestationVerifier for Ed25519Verifier {
    fn verify(
        &self,
        pub_key: &PublicKey,
        payload: &[u8],
        signature: &Signature,
    ) -> Result<(), CryptoError> {
        verify_ed25519(pub_key, payload, signature)
    }
}

impl AttestationSigner for Ed25519KeyPair {
    fn public_key(&self) -> PublicKey {
        Ed25519KeyPair::public_key(self)
    }

    fn sign_payload(&self, payload: &[u8]) -> Signature {
        self.sign(payload)
    }
}
