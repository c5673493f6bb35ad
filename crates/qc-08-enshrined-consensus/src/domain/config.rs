//! Enshrined consensus configuration.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Tunables for the inject cache, the local block loop and the loopback RPC
/// endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnshrinedConfig {
    /// Age after which a pending quorum item is dropped uninjected.
    pub cache_ttl_ms: u64,
    /// How often the TTL pruner runs.
    pub prune_interval_ms: u64,
    /// Recent block heights whose confirmations are remembered.
    pub confirmed_retention_heights: u64,
    /// Produce blocks locally instead of waiting for an external engine.
    pub local_block_production: bool,
    pub block_interval_ms: u64,
    /// Byte budget for injected transactions in one proposal.
    pub max_inject_bytes: usize,
    pub rpc_enabled: bool,
    pub rpc_listen_addr: SocketAddr,
    /// Buffered commit events per subscriber.
    pub event_capacity: usize,
}

impl Default for EnshrinedConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 60 * 60 * 1_000,
            prune_interval_ms: 60 * 1_000,
            confirmed_retention_heights: 10,
            local_block_production: true,
            block_interval_ms: 5_000,
            max_inject_bytes: 1024 * 1024,
            rpc_enabled: true,
            rpc_listen_addr: SocketAddr::from(([127, 0, 0, 1], 50_051)),
            event_capacity: 1_000,
        }
    }
}

impl EnshrinedConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EnshrinedConfig = toml::from_str(
            r#"
            cache_ttl_ms = 1000
            rpc_listen_addr = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(1));
        assert_eq!(config.rpc_listen_addr.port(), 9000);
        assert_eq!(config.confirmed_retention_heights, 10);
        assert!(config.rpc_enabled);
    }
}
