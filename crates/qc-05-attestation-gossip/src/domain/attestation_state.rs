//! # Per-Fact Vote State
//!
//! [`AttestationState`] accumulates the votes for one fact and answers the
//! timing questions the gossip layer asks about it: has it reached the point
//! where late votes should be re-sent, and may it be forgotten.
//!
//! ## Lifecycle
//!
//! ```text
//! first vote ──→ accumulating ──quorum──→ sent ──commit feedback──→ committed
//!                    │                      │                          │
//!          non-quorum timeout        late timeout               late timeout
//!                    ↓                      ↓                          ↓
//!                 expired ←─────────────────┴──────────────────────────┘
//! ```

use super::error::{short_key, AttestationError};
use shared_crypto::AttestationVerifier;
use shared_types::{Attestable, Attestation};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttestationEntry {
    attestation: Attestation,
    sent: bool,
    committed: bool,
}

/// Votes collected for a single fact.
///
/// Holds at most one attestation per public key.
#[derive(Debug)]
pub struct AttestationState<T> {
    item: T,
    entries: Vec<AttestationEntry>,
    first_observed: Instant,
    initial_sent: Option<Instant>,
    quorum_sent: Option<Instant>,
    last_sent: Option<Instant>,
    last_send_attempt: Option<Instant>,
    last_committed: Option<Instant>,
}

impl<T: Attestable> AttestationState<T> {
    pub fn new(item: T, now: Instant) -> Self {
        Self {
            item,
            entries: Vec::new(),
            first_observed: now,
            initial_sent: None,
            quorum_sent: None,
            last_sent: None,
            last_send_attempt: None,
            last_committed: None,
        }
    }

    /// Reinitialises a pooled state for a new fact, keeping the vote buffer.
    pub fn reset(&mut self, item: T, now: Instant) {
        self.item = item;
        self.entries.clear();
        self.first_observed = now;
        self.initial_sent = None;
        self.quorum_sent = None;
        self.last_sent = None;
        self.last_send_attempt = None;
        self.last_committed = None;
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    /// Adds a vote.
    ///
    /// Returns `Ok(true)` if the vote was appended and `Ok(false)` if the
    /// identical vote was already present. A different signature from a key
    /// that already voted is rejected with
    /// [`AttestationError::SignatureAlreadyPresent`].
    pub fn add_attestation(
        &mut self,
        attestation: Attestation,
        verifier: &dyn AttestationVerifier,
    ) -> Result<bool, AttestationError> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.attestation.pub_key == attestation.pub_key)
        {
            if existing.attestation.signature == attestation.signature {
                return Ok(false);
            }
            return Err(AttestationError::SignatureAlreadyPresent {
                pub_key: short_key(&attestation.pub_key),
            });
        }

        let payload = self.item.signable_payload()?;
        verifier
            .verify(&attestation.pub_key, &payload, &attestation.signature)
            .map_err(|source| AttestationError::InvalidSignature {
                pub_key: short_key(&attestation.pub_key),
                source,
            })?;

        self.entries.push(AttestationEntry {
            attestation,
            sent: false,
            committed: false,
        });
        Ok(true)
    }

    pub fn attestation_count(&self) -> usize {
        self.entries.len()
    }

    pub fn unsent_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.sent).count()
    }

    /// Every vote, in arrival order.
    pub fn attestations(&self) -> Vec<Attestation> {
        self.entries.iter().map(|e| e.attestation).collect()
    }

    /// Votes not yet delivered to the consensus node.
    pub fn unsent_attestations(&self) -> Vec<Attestation> {
        self.entries
            .iter()
            .filter(|e| !e.sent)
            .map(|e| e.attestation)
            .collect()
    }

    /// Records that a delivery is being attempted, whatever its outcome.
    pub fn mark_send_attempt(&mut self, now: Instant) {
        self.last_send_attempt = Some(now);
    }

    /// Marks every current vote as delivered.
    pub fn mark_attestations_sent(&mut self, is_quorum: bool, now: Instant) {
        for entry in &mut self.entries {
            entry.sent = true;
        }
        self.initial_sent.get_or_insert(now);
        if is_quorum {
            self.quorum_sent.get_or_insert(now);
        }
        self.last_sent = Some(now);
    }

    /// True if unsent votes have waited at least `min_interval`, measured from
    /// the last successful send or, before the first one, from first
    /// observation.
    pub fn should_send_late(&self, min_interval: Duration, now: Instant) -> bool {
        if self.unsent_count() == 0 {
            return false;
        }
        let since = self.last_sent.unwrap_or(self.first_observed);
        now.saturating_duration_since(since) >= min_interval
    }

    /// True once the state can be forgotten.
    ///
    /// - never sent and `non_quorum_timeout` passed since the last send
    ///   attempt (or first observation);
    /// - every vote committed and `late_timeout` passed since the last commit;
    /// - quorum sent and `late_timeout` passed since then.
    pub fn expired_after_quorum(
        &self,
        late_timeout: Duration,
        non_quorum_timeout: Duration,
        now: Instant,
    ) -> bool {
        let never_sent = self.initial_sent.is_none() && {
            let since = self.last_send_attempt.unwrap_or(self.first_observed);
            now.saturating_duration_since(since) >= non_quorum_timeout
        };
        let committed = self.all_committed()
            && self
                .last_committed
                .is_some_and(|at| now.saturating_duration_since(at) >= late_timeout);
        let quorum = self
            .quorum_sent
            .is_some_and(|sent| now.saturating_duration_since(sent) >= late_timeout);

        never_sent || committed || quorum
    }

    /// Flags the given votes as committed to the ledger.
    ///
    /// Committed votes are also treated as sent. Returns how many entries
    /// changed.
    pub fn mark_attestations_committed(&mut self, confirmed: &[Attestation], now: Instant) -> usize {
        let mut marked = 0;
        for entry in &mut self.entries {
            if !entry.committed && confirmed.contains(&entry.attestation) {
                entry.committed = true;
                entry.sent = true;
                marked += 1;
            }
        }
        if marked > 0 {
            self.last_committed = Some(now);
        }
        marked
    }

    fn all_committed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.committed)
    }
}
