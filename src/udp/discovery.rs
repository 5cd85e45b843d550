//! UDP broadcast peer discovery
//!
//! Each node periodically broadcasts
//! `DISCOVER:<username>:<listenPort>:<base64(n)>:<base64(e)>` to the shared
//! discovery port. Listeners collect announcements over a time window,
//! deduplicated by sender IP and announced port. Anything that does not parse
//! is dropped.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use num_traits::Zero;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{DiscoveredPeer, PeerRegistry};
use crate::crypto::PublicKey;
use crate::net::validate_port;
use crate::types::{ShareError, ShareResult, FIELD_SEPARATOR};

pub const DISCOVER_PREFIX: &str = "DISCOVER";

/// Receive buffer size; a 4096-bit modulus encodes to under 700 bytes
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Presence announcement carried in one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub username: String,
    /// TCP listen port of the announcing node
    pub port: u16,
    pub public_key: PublicKey,
}

impl Announcement {
    pub fn new(username: impl Into<String>, port: u16, public_key: PublicKey) -> Self {
        Self {
            username: username.into(),
            port,
            public_key,
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            DISCOVER_PREFIX,
            self.username,
            self.port,
            BASE64.encode(self.public_key.n.to_bytes_be()),
            BASE64.encode(self.public_key.e.to_bytes_be()),
        )
    }

    pub fn parse(datagram: &[u8]) -> ShareResult<Self> {
        let malformed = |why: &str| ShareError::Protocol(format!("bad announcement: {}", why));

        let text = std::str::from_utf8(datagram).map_err(|_| malformed("not UTF-8"))?;
        let fields: Vec<&str> = text.trim_end().split(FIELD_SEPARATOR).collect();
        let [prefix, username, port, n, e] = fields.as_slice() else {
            return Err(malformed("wrong field count"));
        };

        if *prefix != DISCOVER_PREFIX {
            return Err(malformed("missing prefix"));
        }
        if username.is_empty() {
            return Err(malformed("empty username"));
        }
        let port: u16 = port.parse().map_err(|_| malformed("port is not a number"))?;
        let port = validate_port(port).map_err(|_| malformed("port 0"))?;

        let n = BASE64.decode(n).map_err(|_| malformed("modulus is not base64"))?;
        let e = BASE64.decode(e).map_err(|_| malformed("exponent is not base64"))?;
        let public_key = PublicKey::from_be_bytes(&n, &e);
        if public_key.n.is_zero() || public_key.e.is_zero() {
            return Err(malformed("empty key material"));
        }

        Ok(Self {
            username: username.to_string(),
            port,
            public_key,
        })
    }

    /// Registry entry for an announcement received from `from`
    pub fn into_peer(self, from: IpAddr, seen: Instant) -> DiscoveredPeer {
        DiscoveredPeer {
            username: self.username,
            addr: SocketAddr::new(from, self.port),
            public_key: self.public_key,
            last_seen: seen,
        }
    }
}

/// Broadcast `announcement` to `target` every `interval` until cancelled
///
/// Send failures are logged and retried on the next tick.
pub async fn broadcast_presence(
    announcement: &Announcement,
    target: SocketAddr,
    interval: Duration,
    cancel: CancellationToken,
) -> ShareResult<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    let payload = announcement.encode();
    info!(
        "Announcing {} (port {}) to {} every {:?}",
        announcement.username, announcement.port, target, interval
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Stopped announcing {}", announcement.username);
                return Ok(());
            }
            _ = ticker.tick() => {
                match socket.send_to(payload.as_bytes(), target).await {
                    Ok(len) => debug!("Sent {} byte announcement to {}", len, target),
                    Err(e) => warn!("Failed to send announcement to {}: {}", target, e),
                }
            }
        }
    }
}

/// Socket bound to the discovery port
pub struct DiscoveryListener {
    socket: UdpSocket,
}

impl DiscoveryListener {
    /// Listen on `port` on all interfaces
    pub async fn bind(port: u16) -> ShareResult<Self> {
        Self::bind_addr((Ipv4Addr::UNSPECIFIED, port)).await
    }

    pub async fn bind_addr<A: ToSocketAddrs>(addr: A) -> ShareResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Discovery listener bound to {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> ShareResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Collect announcements for `window`
    ///
    /// Returns [`ShareError::Cancelled`] if `cancel` fires first.
    pub async fn collect(
        &self,
        window: Duration,
        cancel: &CancellationToken,
    ) -> ShareResult<Vec<DiscoveredPeer>> {
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut found: HashMap<SocketAddr, DiscoveredPeer> = HashMap::new();

        loop {
            let (len, from) = tokio::select! {
                _ = cancel.cancelled() => return Err(ShareError::Cancelled),
                _ = &mut deadline => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Discovery receive error: {}", e);
                        continue;
                    }
                },
            };

            match Announcement::parse(&buf[..len]) {
                Ok(announcement) => {
                    let peer = announcement.into_peer(from.ip(), Instant::now());
                    debug!("Announcement from {} as {}", from, peer.username);
                    found.insert(peer.addr, peer);
                }
                Err(e) => debug!("Dropped datagram from {}: {}", from, e),
            }
        }

        debug!("Discovery window closed with {} peers", found.len());
        Ok(found.into_values().collect())
    }

    /// Repeat collection windows forever, merging results into `registry`
    ///
    /// Peers for which `is_self` holds are skipped.
    pub async fn scan<F>(
        &self,
        registry: &PeerRegistry,
        window: Duration,
        is_self: F,
        cancel: CancellationToken,
    ) -> ShareResult<()>
    where
        F: Fn(&DiscoveredPeer) -> bool,
    {
        info!("Continuous discovery scan started");
        loop {
            for peer in self.collect(window, &cancel).await? {
                if !is_self(&peer) {
                    registry.upsert(peer).await;
                }
            }
        }
    }
}

/// One discovery window on `port`
pub async fn collect_peers(
    port: u16,
    window: Duration,
    cancel: &CancellationToken,
) -> ShareResult<Vec<DiscoveredPeer>> {
    DiscoveryListener::bind(port).await?.collect(window, cancel).await
}
