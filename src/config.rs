//! Node configuration
//!
//! Loaded from JSON; every field is optional and falls back to its default.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::rsa::{DEFAULT_KEY_BITS, MIN_KEY_BITS};
use crate::net::validate_port;
use crate::types::{
    ShareError, ShareResult, DEFAULT_CHUNK_SIZE, DEFAULT_DISCOVERY_PORT, FIELD_SEPARATOR,
};

/// Settings for one peer instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name announced to other peers
    pub username: String,
    /// TCP port for inbound transfers and chats; 0 picks a free port
    pub listen_port: u16,
    /// RSA modulus size
    pub key_bits: u64,
    /// Raw ciphertext streaming chunk size
    pub chunk_size: usize,
    /// Where accepted files are written
    pub save_dir: PathBuf,
    pub discovery: DiscoveryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            listen_port: 0,
            key_bits: DEFAULT_KEY_BITS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            save_dir: PathBuf::from("received"),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> ShareResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Parse JSON config text
    pub fn from_json(raw: &str) -> ShareResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| ShareError::Validation(format!("invalid config: {}", e)))
    }

    /// Check the settings a node cannot run without
    pub fn validate(&self) -> ShareResult<()> {
        validate_username(&self.username)?;
        if self.key_bits < MIN_KEY_BITS {
            return Err(ShareError::Validation(format!(
                "key_bits must be at least {}, got {}",
                MIN_KEY_BITS, self.key_bits
            )));
        }
        if self.chunk_size == 0 {
            return Err(ShareError::Validation("chunk_size must be non-zero".to_string()));
        }
        validate_port(self.discovery.port)?;
        Ok(())
    }
}

/// Usernames travel inside `:`-separated commands and announcements
pub fn validate_username(username: &str) -> ShareResult<()> {
    if username.is_empty() {
        return Err(ShareError::Validation("username must not be empty".to_string()));
    }
    if username.contains(FIELD_SEPARATOR) {
        return Err(ShareError::Validation(format!(
            "username must not contain '{}': {:?}",
            FIELD_SEPARATOR, username
        )));
    }
    Ok(())
}

/// UDP discovery timing and addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Shared discovery port
    pub port: u16,
    /// Destination of announcements
    pub broadcast_addr: Ipv4Addr,
    #[serde(with = "millis")]
    pub announce_interval: Duration,
    #[serde(with = "millis")]
    pub collect_window: Duration,
    /// Registry entries unseen for longer than this are evicted
    #[serde(with = "millis")]
    pub peer_timeout: Duration,
    #[serde(with = "millis")]
    pub eviction_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            announce_interval: Duration::from_secs(2),
            collect_window: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(10),
            eviction_interval: Duration::from_secs(5),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.key_bits, 512);
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.discovery.port, 12345);
        assert_eq!(config.discovery.broadcast_addr, Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(config.discovery.announce_interval, Duration::from_secs(2));
        assert_eq!(config.discovery.collect_window, Duration::from_secs(5));
        assert_eq!(config.discovery.peer_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = NodeConfig::from_json(
            r#"{"username": "alice", "listen_port": 5000, "discovery": {"collect_window": 1500}}"#,
        )
        .unwrap();
        assert_eq!(config.username, "alice");
        assert_eq!(config.listen_port, 5000);
        assert_eq!(config.discovery.collect_window, Duration::from_millis(1500));
        assert_eq!(config.discovery.port, 12345);
        assert_eq!(config.chunk_size, 8192);
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let config = NodeConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["discovery"]["peer_timeout"], 10_000);
        let back: NodeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            NodeConfig::from_json("{ not json"),
            Err(ShareError::Validation(_))
        ));
    }

    #[test]
    fn test_validation() {
        let bad = [
            NodeConfig {
                username: String::new(),
                ..NodeConfig::default()
            },
            NodeConfig {
                username: "a:b".to_string(),
                ..NodeConfig::default()
            },
            NodeConfig {
                key_bits: 256,
                ..NodeConfig::default()
            },
            NodeConfig {
                chunk_size: 0,
                ..NodeConfig::default()
            },
            NodeConfig {
                discovery: DiscoveryConfig {
                    port: 0,
                    ..DiscoveryConfig::default()
                },
                ..NodeConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ShareError::Validation(_))));
        }
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir()
            .join(format!("peershare-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"username": "carol", "key_bits": 1024}"#).unwrap();
        let config = NodeConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.username, "carol");
        assert_eq!(config.key_bits, 1024);

        assert!(matches!(NodeConfig::from_file(&path), Err(ShareError::Io(_))));
    }
}
