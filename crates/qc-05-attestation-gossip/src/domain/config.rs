//! Gossip configuration.

use serde::Deserialize;
use std::time::Duration;

/// Tunables for gossip, batching, peer concurrency and bulk sync.
///
/// Durations are milliseconds so the struct maps directly onto TOML.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Minimum time between timer-driven batch flushes.
    pub batch_interval_ms: u64,
    /// Maximum votes per fact kind in one batch; reaching it forces a flush.
    pub max_batch_size: usize,
    /// Votes held per fact kind awaiting broadcast; further votes are dropped.
    pub max_queued_per_kind: usize,
    /// Deadline for one peer send or one sync step.
    pub peer_timeout_ms: u64,
    /// Concurrent outbound streams per peer.
    pub peer_concurrent_sends: usize,
    /// Concurrent inbound streams per peer.
    pub peer_concurrent_receives: usize,
    /// How long to wait for a peer token before dropping the send.
    pub peer_acquire_timeout_ms: u64,
    /// Idle time after which a peer's token pool is discarded.
    pub peer_prune_interval_ms: u64,
    pub reconcile_interval_ms: u64,
    /// Retention after quorum (or full commit) before a state is dropped.
    pub late_observe_timeout_ms: u64,
    /// Retention for states that never reached quorum.
    pub non_quorum_timeout_ms: u64,
    /// Minimum spacing between re-sends of late votes.
    pub min_time_between_resends_ms: u64,
    /// Number of random peers asked for their state at startup.
    pub sync_peer_count: usize,
    /// Delay before the startup sync.
    pub sync_delay_ms: u64,
    /// Items per fact kind in one sync batch.
    pub sync_batch_size: usize,
    pub keysign_cache_ttl_ms: u64,
    pub validator_cache_ttl_ms: u64,
    pub supermajority_numerator: u64,
    pub supermajority_denominator: u64,
    /// Pooled states kept per fact kind.
    pub state_pool_capacity: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: 1_000,
            max_batch_size: 100,
            max_queued_per_kind: 10_000,
            peer_timeout_ms: 20_000,
            peer_concurrent_sends: 10,
            peer_concurrent_receives: 10,
            peer_acquire_timeout_ms: 1_000,
            peer_prune_interval_ms: 10 * 60 * 1_000,
            reconcile_interval_ms: 1_000,
            late_observe_timeout_ms: 2 * 60 * 1_000,
            non_quorum_timeout_ms: 10 * 60 * 60 * 1_000,
            min_time_between_resends_ms: 5_000,
            sync_peer_count: 3,
            sync_delay_ms: 5_000,
            sync_batch_size: 100,
            keysign_cache_ttl_ms: 60_000,
            validator_cache_ttl_ms: 10_000,
            supermajority_numerator: 2,
            supermajority_denominator: 3,
            state_pool_capacity: 1_000,
        }
    }
}

impl GossipConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn peer_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_acquire_timeout_ms)
    }

    pub fn peer_prune_interval(&self) -> Duration {
        Duration::from_millis(self.peer_prune_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn late_observe_timeout(&self) -> Duration {
        Duration::from_millis(self.late_observe_timeout_ms)
    }

    pub fn non_quorum_timeout(&self) -> Duration {
        Duration::from_millis(self.non_quorum_timeout_ms)
    }

    pub fn min_time_between_resends(&self) -> Duration {
        Duration::from_millis(self.min_time_between_resends_ms)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    pub fn keysign_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.keysign_cache_ttl_ms)
    }

    pub fn validator_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.validator_cache_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GossipConfig::default();
        assert_eq!(config.sync_peer_count, 3);
        assert_eq!(config.supermajority_numerator, 2);
        assert_eq!(config.supermajority_denominator, 3);
        assert_eq!(config.batch_interval(), Duration::from_secs(1));
    }
}
