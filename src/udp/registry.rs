//! Registry of discovered peers keyed by `IP:port`

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::crypto::PublicKey;
use crate::types::{ShareError, ShareResult};

/// A peer seen on the discovery port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub username: String,
    /// Sender IP with the announced listen port
    pub addr: SocketAddr,
    pub public_key: PublicKey,
    pub last_seen: Instant,
}

/// Shared peer table
///
/// Written by the discovery scanner and pruned by the eviction task; clones
/// share the same table.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<SocketAddr, DiscoveredPeer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer; returns `true` if it was not known before
    pub async fn upsert(&self, peer: DiscoveredPeer) -> bool {
        let mut peers = self.peers.write().await;
        let is_new = !peers.contains_key(&peer.addr);
        if is_new {
            info!("Discovered {} at {}", peer.username, peer.addr);
        } else {
            debug!("Refreshed {} at {}", peer.username, peer.addr);
        }
        peers.insert(peer.addr, peer);
        is_new
    }

    pub async fn get(&self, addr: &SocketAddr) -> Option<DiscoveredPeer> {
        self.peers.read().await.get(addr).cloned()
    }

    /// Most recently seen peer announcing `username`
    pub async fn find_by_username(&self, username: &str) -> Option<DiscoveredPeer> {
        self.peers
            .read()
            .await
            .values()
            .filter(|p| p.username == username)
            .max_by_key(|p| p.last_seen)
            .cloned()
    }

    /// All peers, ordered by username then address
    pub async fn snapshot(&self) -> Vec<DiscoveredPeer> {
        let mut peers: Vec<_> = self.peers.read().await.values().cloned().collect();
        peers.sort_by(|a, b| a.username.cmp(&b.username).then(a.addr.cmp(&b.addr)));
        peers
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Remove peers unseen for longer than `timeout`
    pub async fn evict_expired(&self, timeout: Duration) -> Vec<DiscoveredPeer> {
        self.evict_expired_at(Instant::now(), timeout).await
    }

    /// Eviction pass against an explicit clock reading
    pub async fn evict_expired_at(&self, now: Instant, timeout: Duration) -> Vec<DiscoveredPeer> {
        let mut peers = self.peers.write().await;
        let expired: Vec<SocketAddr> = peers
            .values()
            .filter(|p| now.saturating_duration_since(p.last_seen) > timeout)
            .map(|p| p.addr)
            .collect();

        expired
            .iter()
            .filter_map(|addr| peers.remove(addr))
            .inspect(|p| info!("Evicted {} at {}", p.username, p.addr))
            .collect()
    }

    /// Run eviction passes every `interval` until cancelled
    pub async fn run_eviction(
        &self,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ShareResult<()> {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ShareError::Cancelled),
                _ = ticker.tick() => {
                    let evicted = self.evict_expired(timeout).await;
                    if !evicted.is_empty() {
                        debug!("Eviction pass removed {} peers", evicted.len());
                    }
                }
            }
        }
    }
}
