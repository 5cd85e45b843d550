// Shared helpers for the loopback integration tests

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use peershare::crypto::rsa::DEFAULT_KEY_BITS;
use peershare::crypto::KeyPair;
use peershare::udp::DiscoveredPeer;
use peershare::{DiscoveryConfig, Node, NodeConfig};

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

/// Fresh per-test scratch directory under the system temp dir
pub fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "peershare-it-{}-{}-{}",
        label,
        std::process::id(),
        NEXT_DIR.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// A UDP port that was free a moment ago
pub fn free_udp_port() -> u16 {
    UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .expect("probe udp port")
}

/// Discovery settings that stay on loopback with short timings
pub fn loopback_discovery(port: u16) -> DiscoveryConfig {
    DiscoveryConfig {
        port,
        broadcast_addr: Ipv4Addr::LOCALHOST,
        announce_interval: Duration::from_millis(100),
        collect_window: Duration::from_millis(400),
        peer_timeout: Duration::from_millis(300),
        eviction_interval: Duration::from_millis(100),
    }
}

pub fn node(username: &str, discovery_port: u16) -> Node {
    let config = NodeConfig {
        username: username.to_string(),
        save_dir: scratch_dir(username),
        discovery: loopback_discovery(discovery_port),
        ..NodeConfig::default()
    };
    let keys = KeyPair::generate(DEFAULT_KEY_BITS).expect("generate keys");
    Node::with_keys(config, keys).expect("valid node config")
}

/// Registry entry pointing at `node`'s listener on loopback
pub fn peer_entry(node: &Node, listen: SocketAddr) -> DiscoveredPeer {
    DiscoveredPeer {
        username: node.username().to_string(),
        addr: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), listen.port()),
        public_key: node.public_key().clone(),
        last_seen: tokio::time::Instant::now(),
    }
}
