//! TTL caches in front of the validator-set and keysign-party providers.

use crate::domain::GossipError;
use crate::ports::outbound::{KeysignPartyProvider, ValidatorSetProvider};
use parking_lot::Mutex;
use shared_types::PublicKey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Cached active validator set.
pub struct ActiveValidatorCache {
    provider: Arc<dyn ValidatorSetProvider>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Arc<HashSet<PublicKey>>)>>,
}

impl ActiveValidatorCache {
    pub fn new(provider: Arc<dyn ValidatorSetProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Returns the active set, refreshing it once the TTL has passed.
    pub async fn active(&self) -> Result<Arc<HashSet<PublicKey>>, GossipError> {
        let cached = self.cached.lock().clone();
        if let Some((fetched, set)) = cached {
            if fetched.elapsed() < self.ttl {
                return Ok(set);
            }
        }

        let set: Arc<HashSet<PublicKey>> =
            Arc::new(self.provider.active_validators().await?.into_iter().collect());
        debug!(validators = set.len(), "Refreshed active validator set");
        *self.cached.lock() = Some((Instant::now(), set.clone()));
        Ok(set)
    }

    pub async fn is_active(&self, pub_key: &PublicKey) -> Result<bool, GossipError> {
        Ok(self.active().await?.contains(pub_key))
    }

    /// Forces the next lookup to hit the provider.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

/// Cached keysign party sizes, keyed by vault.
pub struct KeysignPartyCache {
    provider: Arc<dyn KeysignPartyProvider>,
    ttl: Duration,
    entries: Mutex<HashMap<String, (usize, Instant)>>,
}

impl KeysignPartyCache {
    pub fn new(provider: Arc<dyn KeysignPartyProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn party_size(&self, vault: &str) -> Result<usize, GossipError> {
        let cached = self.entries.lock().get(vault).copied();
        if let Some((size, fetched)) = cached {
            if fetched.elapsed() < self.ttl {
                return Ok(size);
            }
        }

        let size = self.provider.party_size(vault).await?;
        self.entries
            .lock()
            .insert(vault.to_string(), (size, Instant::now()));
        Ok(size)
    }

    /// Drops entries older than the TTL. Returns how many were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, fetched)| now.saturating_duration_since(*fetched) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
