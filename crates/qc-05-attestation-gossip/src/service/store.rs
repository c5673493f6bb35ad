//! Per-kind map of fact states.
//!
//! The map lock only guards insertion, lookup and removal. Each state sits
//! behind its own async mutex, held across the whole add-vote / quorum-check /
//! forward sequence for that fact.

use crate::domain::{AttestationState, AttestationStatePool};
use parking_lot::Mutex;
use shared_types::{Attestable, Quorum};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub type SharedState<T> = Arc<tokio::sync::Mutex<AttestationState<T>>>;

pub struct FactStore<T: Attestable> {
    states: Mutex<HashMap<T::Key, SharedState<T>>>,
    pool: AttestationStatePool<T>,
}

impl<T: Attestable> FactStore<T> {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            pool: AttestationStatePool::new(pool_capacity),
        }
    }

    /// Returns the state for `item`, creating it on first sight.
    pub fn get_or_create(&self, item: &T, now: Instant) -> SharedState<T> {
        let key = item.key();
        let mut states = self.states.lock();
        if let Some(state) = states.get(&key) {
            return state.clone();
        }
        let state = Arc::new(tokio::sync::Mutex::new(self.pool.take(item.clone(), now)));
        states.insert(key, state.clone());
        state
    }

    /// Drops a state created for a vote that was then rejected. Nothing is
    /// removed if another task holds a handle to it.
    pub fn discard_unused(&self, key: &T::Key, state: SharedState<T>) -> bool {
        {
            let mut states = self.states.lock();
            match states.get(key) {
                Some(current) if Arc::ptr_eq(current, &state) && Arc::strong_count(&state) == 2 => {
                    states.remove(key);
                }
                _ => return false,
            }
        }
        if let Ok(mutex) = Arc::try_unwrap(state) {
            self.pool.put(mutex.into_inner());
        }
        true
    }

    pub fn get(&self, key: &T::Key) -> Option<SharedState<T>> {
        self.states.lock().get(key).cloned()
    }

    /// Handles to every state, taken under the map lock.
    pub fn states(&self) -> Vec<SharedState<T>> {
        self.states.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy of every fact with its full vote list.
    pub async fn snapshot(&self) -> Vec<Quorum<T>> {
        let mut out = Vec::new();
        for state in self.states() {
            let state = state.lock().await;
            out.push(Quorum::new(state.item().clone(), state.attestations()));
        }
        out
    }

    /// Removes expired states and returns them to the pool.
    ///
    /// Returns the number removed.
    pub async fn prune_expired(
        &self,
        late_timeout: Duration,
        non_quorum_timeout: Duration,
        now: Instant,
    ) -> usize {
        let entries: Vec<(T::Key, SharedState<T>)> = self
            .states
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut expired = Vec::new();
        for (key, state) in entries {
            if state
                .lock()
                .await
                .expired_after_quorum(late_timeout, non_quorum_timeout, now)
            {
                expired.push((key, state));
            }
        }

        let mut removed = 0;
        for (key, state) in expired {
            let taken = {
                let mut states = self.states.lock();
                match states.get(&key) {
                    // Only remove the exact state we inspected.
                    Some(current) if Arc::ptr_eq(current, &state) => states.remove(&key),
                    _ => None,
                }
            };
            if let Some(taken) = taken {
                removed += 1;
                drop(taken);
                if let Ok(mutex) = Arc::try_unwrap(state) {
                    self.pool.put(mutex.into_inner());
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::{AttestationSigner, Ed25519KeyPair, Ed25519Verifier};
    use shared_types::ErrataTx;

    fn errata(id: &str) -> ErrataTx {
        ErrataTx {
            chain: "BTC".into(),
            tx_id: id.into(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_keyed() {
        let store = FactStore::new(4);
        let now = Instant::now();
        let a = store.get_or_create(&errata("a"), now);
        let again = store.get_or_create(&errata("a"), now);
        let b = store.get_or_create(&errata("b"), now);

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_copies_votes() {
        let store = FactStore::new(4);
        let item = errata("a");
        let vote = Ed25519KeyPair::from_seed([1; 32]).attest(&item).unwrap();
        store
            .get_or_create(&item, Instant::now())
            .lock()
            .await
            .add_attestation(vote, &Ed25519Verifier)
            .unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot, vec![Quorum::new(item, vec![vote])]);
    }

    #[tokio::test]
    async fn test_discard_unused_skips_shared_state() {
        let store = FactStore::new(4);
        let now = Instant::now();
        let item = errata("rejected");

        let first = store.get_or_create(&item, now);
        let second = store.get_or_create(&item, now);
        assert!(!store.discard_unused(&item.key(), first));
        assert_eq!(store.len(), 1);

        assert!(store.discard_unused(&item.key(), second));
        assert!(store.is_empty());
        assert_eq!(store.pool.available(), 1);
    }

    #[tokio::test]
    async fn test_prune_expired_recycles_state() {
        let store = FactStore::new(4);
        let start = Instant::now();
        store.get_or_create(&errata("old"), start);

        let late = Duration::from_secs(1);
        let non_quorum = Duration::from_secs(10);
        assert_eq!(store.prune_expired(late, non_quorum, start).await, 0);

        let later = start + non_quorum;
        assert_eq!(store.prune_expired(late, non_quorum, later).await, 1);
        assert!(store.is_empty());
        assert_eq!(store.pool.available(), 1);
    }
}
