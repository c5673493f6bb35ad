//! # Inject Cache
//!
//! Consensus-local holding area for quorum-strength vote sets of one fact
//! kind, waiting to be injected into a block proposal.
//!
//! Two structures are kept:
//! - the pending list, one merged [`Quorum`] per fact identity;
//! - a recently-confirmed index keyed by block height, so votes that were just
//!   committed are not re-admitted when gossip delivers them late.

use shared_types::{Attestable, Attestation, Quorum};
use std::collections::BTreeMap;
use tokio::time::{Duration, Instant};

/// A cache entry with its insertion and last-merge times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedItem<T> {
    pub item: T,
    pub inserted: Instant,
    pub updated: Instant,
}

impl<T> TimestampedItem<T> {
    pub fn new(item: T, now: Instant) -> Self {
        Self {
            item,
            inserted: now,
            updated: now,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted)
    }
}

/// Result of [`InjectCache::mark_confirmed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confirmation {
    /// Votes removed from the pending entry.
    pub removed: usize,
    /// The pending entry became empty and was deleted.
    pub entry_deleted: bool,
    /// The confirmation was new and has been recorded at the height.
    pub recorded: bool,
}

pub struct InjectCache<T: Attestable> {
    pending: Vec<TimestampedItem<Quorum<T>>>,
    confirmed: BTreeMap<u64, Vec<Quorum<T>>>,
    retention: u64,
}

impl<T: Attestable> InjectCache<T> {
    /// `retention` is the number of recent heights whose confirmations are
    /// remembered.
    pub fn new(retention: u64) -> Self {
        Self {
            pending: Vec::new(),
            confirmed: BTreeMap::new(),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Quorum<T>> {
        self.pending.iter().map(|entry| &entry.item)
    }

    pub fn get(&self, item: &T) -> Option<&TimestampedItem<Quorum<T>>> {
        let key = item.key();
        self.pending.iter().find(|entry| entry.item.item.key() == key)
    }

    /// Heights currently held in the recently-confirmed index.
    pub fn confirmed_heights(&self) -> Vec<u64> {
        self.confirmed.keys().copied().collect()
    }

    fn recently_confirmed(&self, key: &T::Key, attestation: &Attestation) -> bool {
        self.confirmed.values().flatten().any(|quorum| {
            quorum.attestations.contains(attestation) && quorum.item.key() == *key
        })
    }

    /// Merges a vote set into the pending list.
    ///
    /// Votes recently confirmed for the same fact are dropped first; the rest
    /// are merged into the pending entry with the same identity (deduplicated
    /// on the full attestation), or inserted as a new entry. Returns the
    /// number of votes added.
    pub fn add_item(&mut self, quorum: Quorum<T>, now: Instant) -> usize {
        let key = quorum.item.key();
        let Quorum { item, attestations } = quorum;
        let fresh: Vec<Attestation> = attestations
            .into_iter()
            .filter(|a| !self.recently_confirmed(&key, a))
            .collect();
        if fresh.is_empty() {
            return 0;
        }

        match self
            .pending
            .iter_mut()
            .find(|entry| entry.item.item.key() == key)
        {
            Some(entry) => {
                let mut added = 0;
                for attestation in fresh {
                    if !entry.item.contains(&attestation) {
                        entry.item.attestations.push(attestation);
                        added += 1;
                    }
                }
                if added > 0 {
                    entry.updated = now;
                }
                added
            }
            None => {
                let mut unique: Vec<Attestation> = Vec::with_capacity(fresh.len());
                for attestation in fresh {
                    if !unique.contains(&attestation) {
                        unique.push(attestation);
                    }
                }
                let added = unique.len();
                self.pending
                    .push(TimestampedItem::new(Quorum::new(item, unique), now));
                added
            }
        }
    }

    /// Applies a ledger confirmation of `confirmed` at `height`.
    ///
    /// Removes the confirmed votes from the matching pending entry, deletes
    /// the entry once empty, records the confirmation at `height` and drops
    /// index heights older than the retention window. Repeating an identical
    /// confirmation changes nothing.
    pub fn mark_confirmed(&mut self, confirmed: &Quorum<T>, height: u64) -> Confirmation {
        let key = confirmed.item.key();
        let mut outcome = Confirmation::default();

        if let Some(index) = self
            .pending
            .iter()
            .position(|entry| entry.item.item.key() == key)
        {
            let entry = &mut self.pending[index].item;
            let before = entry.attestations.len();
            entry
                .attestations
                .retain(|a| !confirmed.attestations.contains(a));
            outcome.removed = before - entry.attestations.len();
            if entry.attestations.is_empty() {
                self.pending.remove(index);
                outcome.entry_deleted = true;
            }
        }

        let already_recorded = confirmed
            .attestations
            .iter()
            .all(|a| self.recently_confirmed(&key, a));
        if !already_recorded {
            self.confirmed
                .entry(height)
                .or_default()
                .push(confirmed.clone());
            outcome.recorded = true;
        }

        let oldest_kept = height.saturating_sub(self.retention.saturating_sub(1));
        self.confirmed = self.confirmed.split_off(&oldest_kept);
        outcome
    }

    /// Removes pending entries older than `ttl` and returns them.
    pub fn prune_expired(&mut self, ttl: Duration, now: Instant) -> Vec<Quorum<T>> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|entry| entry.age(now) >= ttl);
        self.pending = kept;
        expired.into_iter().map(|entry| entry.item).collect()
    }
}
