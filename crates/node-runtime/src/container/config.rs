//! # Node Configuration
//!
//! Unified configuration for the validator: identity, peers, validator set,
//! logging, and the two subsystem configs.
//!
//! Loaded from an optional TOML file, then overridden from `QC_*` environment
//! variables:
//!
//! | Variable          | Field                         |
//! |-------------------|-------------------------------|
//! | `QC_IDENTITY_SEED`| `identity.seed` (64 hex chars)|
//! | `QC_LISTEN_ADDR`  | `network.listen_addr`         |
//! | `QC_RPC_ADDR`     | `consensus.rpc_listen_addr`   |
//! | `QC_LOG_LEVEL`    | `logging.level`               |
//! | `QC_LOG_JSON`     | `logging.json`                |

use qc_05_attestation_gossip::GossipConfig;
use qc_08_enshrined_consensus::EnshrinedConfig;
use serde::Deserialize;
use shared_types::{PeerId, PublicKey};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file when no CLI argument is given.
pub const CONFIG_PATH_ENV: &str = "QC_CONFIG";

/// Complete node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub validators: ValidatorSetConfig,
    pub logging: LoggingConfig,
    pub gossip: GossipConfig,
    pub consensus: EnshrinedConfig,
}

/// Signing identity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hex-encoded 32-byte Ed25519 seed. A fresh key is generated if unset.
    pub seed: Option<String>,
}

/// Peer-to-peer networking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_addr: SocketAddr,
    /// Static peer book.
    pub peers: Vec<PeerConfig>,
    pub dial_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5_040)),
            peers: Vec::new(),
            dial_timeout_ms: 5_000,
        }
    }
}

impl NetworkConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerConfig {
    /// Hex-encoded validator public key; doubles as the peer id.
    pub public_key: String,
    pub addr: SocketAddr,
}

/// Static validator set and keysign parties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValidatorSetConfig {
    /// Hex-encoded public keys of the active validators.
    pub public_keys: Vec<String>,
    /// Keysign party size per vault.
    pub keysign_parties: HashMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {field}: {value:?}")]
    InvalidValue { field: String, value: String },
}

impl NodeConfig {
    /// Reads `path` if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies `QC_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(seed) = lookup("QC_IDENTITY_SEED") {
            self.identity.seed = Some(seed);
        }
        if let Some(addr) = lookup("QC_LISTEN_ADDR") {
            self.network.listen_addr = parse_addr("QC_LISTEN_ADDR", &addr)?;
        }
        if let Some(addr) = lookup("QC_RPC_ADDR") {
            self.consensus.rpc_listen_addr = parse_addr("QC_RPC_ADDR", &addr)?;
        }
        if let Some(level) = lookup("QC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("QC_LOG_JSON") {
            self.logging.json = match json.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(invalid("QC_LOG_JSON", &json)),
            };
        }
        Ok(())
    }

    /// The configured identity seed, if any.
    pub fn identity_seed(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        self.identity
            .seed
            .as_deref()
            .map(|seed| decode_key("identity.seed", seed))
            .transpose()
    }

    pub fn validator_keys(&self) -> Result<Vec<PublicKey>, ConfigError> {
        self.validators
            .public_keys
            .iter()
            .map(|key| decode_key("validators.public_keys", key))
            .collect()
    }

    /// Peer id to dial address.
    pub fn peer_book(&self) -> Result<HashMap<PeerId, SocketAddr>, ConfigError> {
        self.network
            .peers
            .iter()
            .map(|peer| {
                let key = decode_key("network.peers.public_key", &peer.public_key)?;
                Ok((PeerId::from_public_key(&key), peer.addr))
            })
            .collect()
    }
}

fn invalid(field: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn decode_key(field: &str, value: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(value.trim_start_matches("0x")).map_err(|_| invalid(field, value))?;
    bytes.try_into().map_err(|_| invalid(field, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "0101010101010101010101010101010101010101010101010101010101010101";
    const KEY_B: &str = "0202020202020202020202020202020202020202020202020202020202020202";

    #[test]
    fn test_defaults_without_file() {
        let config = NodeConfig::default();
        assert_eq!(config.network.listen_addr.port(), 5_040);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.gossip, GossipConfig::default());
        assert_eq!(config.consensus, EnshrinedConfig::default());
        assert_eq!(config.identity_seed().unwrap(), None);
    }

    #[test]
    fn test_parse_full_file() {
        let config = NodeConfig::from_toml(&format!(
            r#"
            [identity]
            seed = "{KEY_A}"

            [network]
            listen_addr = "127.0.0.1:6000"
            [[network.peers]]
            public_key = "{KEY_B}"
            addr = "10.0.0.2:6000"

            [validators]
            public_keys = ["{KEY_A}", "0x{KEY_B}"]
            keysign_parties = {{ vault-1 = 3 }}

            [gossip]
            batch_interval_ms = 250
            supermajority_numerator = 3
            supermajority_denominator = 4

            [consensus]
            cache_ttl_ms = 5000
            rpc_enabled = false
            "#
        ))
        .unwrap();

        assert_eq!(config.identity_seed().unwrap(), Some([1; 32]));
        assert_eq!(config.validator_keys().unwrap(), vec![[1; 32], [2; 32]]);
        assert_eq!(
            config.peer_book().unwrap().get(&PeerId::from_public_key(&[2; 32])),
            Some(&"10.0.0.2:6000".parse().unwrap())
        );
        assert_eq!(config.validators.keysign_parties.get("vault-1"), Some(&3));
        assert_eq!(config.gossip.batch_interval_ms, 250);
        assert_eq!(config.gossip.max_batch_size, 100);
        assert_eq!(config.gossip.supermajority_numerator, 3);
        assert!(!config.consensus.rpc_enabled);
        assert_eq!(config.consensus.cache_ttl_ms, 5_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = NodeConfig::default();
        let env: HashMap<&str, &str> = [
            ("QC_IDENTITY_SEED", KEY_B),
            ("QC_LISTEN_ADDR", "127.0.0.1:7000"),
            ("QC_RPC_ADDR", "127.0.0.1:7001"),
            ("QC_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.identity_seed().unwrap(), Some([2; 32]));
        assert_eq!(config.network.listen_addr.port(), 7_000);
        assert_eq!(config.consensus.rpc_listen_addr.port(), 7_001);
        assert!(config.logging.json);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = NodeConfig::default();
        let err = config
            .apply_overrides(|name| (name == "QC_LISTEN_ADDR").then(|| "nope".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        config.validators.public_keys = vec!["abcd".into()];
        assert!(config.validator_keys().is_err());
    }
}
