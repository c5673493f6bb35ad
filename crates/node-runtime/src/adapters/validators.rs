//! Config-backed validator set and keysign parties.

use async_trait::async_trait;
use qc_05_attestation_gossip::{GossipError, KeysignPartyProvider, ValidatorSetProvider};
use shared_types::PublicKey;
use std::collections::HashMap;

/// Fixed active validator set.
pub struct StaticValidatorSet {
    validators: Vec<PublicKey>,
}

impl StaticValidatorSet {
    pub fn new(validators: Vec<PublicKey>) -> Self {
        Self { validators }
    }
}

#[async_trait]
impl ValidatorSetProvider for StaticValidatorSet {
    async fn active_validators(&self) -> Result<Vec<PublicKey>, GossipError> {
        if self.validators.is_empty() {
            return Err(GossipError::ValidatorSet("no validators configured".into()));
        }
        Ok(self.validators.clone())
    }
}

/// Fixed keysign party sizes per vault.
pub struct StaticKeysignParties {
    parties: HashMap<String, usize>,
}

impl StaticKeysignParties {
    pub fn new(parties: HashMap<String, usize>) -> Self {
        Self { parties }
    }
}

#[async_trait]
impl KeysignPartyProvider for StaticKeysignParties {
    async fn party_size(&self, vault: &str) -> Result<usize, GossipError> {
        self.parties
            .get(vault)
            .copied()
            .ok_or_else(|| GossipError::ValidatorSet(format!("unknown vault {vault}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_validator_set() {
        let set = StaticValidatorSet::new(vec![[1; 32], [2; 32]]);
        assert_eq!(set.active_validators().await.unwrap(), vec![[1; 32], [2; 32]]);

        let empty = StaticValidatorSet::new(Vec::new());
        assert!(matches!(
            empty.active_validators().await,
            Err(GossipError::ValidatorSet(_))
        ));
    }

    #[tokio::test]
    async fn test_keysign_party_lookup() {
        let parties = StaticKeysignParties::new([("vault-1".to_string(), 3)].into_iter().collect());
        assert_eq!(parties.party_size("vault-1").await.unwrap(), 3);
        assert!(parties.party_size("vault-2").await.is_err());
    }
}
