//! # Per-Peer Concurrency Limits
//!
//! Each peer gets its own token pool, created on first use. A caller that
//! cannot get a token within the acquire timeout receives
//! [`GossipError::PeerBusy`] and must drop the work rather than queue it, so
//! a wedged peer only ever affects itself.

use crate::domain::GossipError;
use parking_lot::Mutex;
use shared_types::PeerId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Duration, Instant};
use tracing::trace;

struct PeerSemaphore {
    tokens: Arc<Semaphore>,
    /// Holders plus callers waiting for a token.
    ref_count: usize,
    /// When `ref_count` last dropped to zero.
    last_zero: Instant,
}

struct PeerManagerInner {
    peers: Mutex<HashMap<PeerId, PeerSemaphore>>,
    limit: usize,
    acquire_timeout: Duration,
    prune_after: Duration,
}

impl PeerManagerInner {
    fn release(&self, peer: &PeerId) {
        let mut peers = self.peers.lock();
        if let Some(entry) = peers.get_mut(peer) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
            if entry.ref_count == 0 {
                entry.last_zero = Instant::now();
            }
        }
    }
}

/// Bounded per-peer token pools.
#[derive(Clone)]
pub struct PeerManager {
    inner: Arc<PeerManagerInner>,
}

impl PeerManager {
    pub fn new(limit: usize, acquire_timeout: Duration, prune_after: Duration) -> Self {
        Self {
            inner: Arc::new(PeerManagerInner {
                peers: Mutex::new(HashMap::new()),
                limit: limit.max(1),
                acquire_timeout,
                prune_after,
            }),
        }
    }

    /// Takes one of `peer`'s tokens, waiting at most the acquire timeout.
    pub async fn acquire(&self, peer: PeerId) -> Result<PeerPermit, GossipError> {
        let tokens = {
            let mut peers = self.inner.peers.lock();
            let entry = peers.entry(peer).or_insert_with(|| PeerSemaphore {
                tokens: Arc::new(Semaphore::new(self.inner.limit)),
                ref_count: 0,
                last_zero: Instant::now(),
            });
            entry.ref_count += 1;
            entry.tokens.clone()
        };

        // Holds the reference from here on, so a timeout or a dropped future
        // gives it back.
        let mut permit = PeerPermit {
            inner: self.inner.clone(),
            peer,
            _token: None,
        };

        match timeout(self.inner.acquire_timeout, tokens.acquire_owned()).await {
            Ok(Ok(token)) => {
                permit._token = Some(token);
                Ok(permit)
            }
            _ => {
                trace!(peer = %peer, "Peer token pool exhausted");
                Err(GossipError::PeerBusy(peer))
            }
        }
    }

    /// Drops pools that have had no holders for longer than the prune
    /// interval. Returns how many were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let mut peers = self.inner.peers.lock();
        let before = peers.len();
        peers.retain(|_, entry| {
            entry.ref_count > 0
                || now.saturating_duration_since(entry.last_zero) < self.inner.prune_after
        });
        before - peers.len()
    }

    /// Number of peers with a live token pool.
    pub fn tracked_peers(&self) -> usize {
        self.inner.peers.lock().len()
    }
}

/// A held peer token. Released on drop.
pub struct PeerPermit {
    inner: Arc<PeerManagerInner>,
    peer: PeerId,
    _token: Option<OwnedSemaphorePermit>,
}

impl PeerPermit {
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

impl Drop for PeerPermit {
    fn drop(&mut self) {
        self.inner.release(&self.peer);
    }
}
