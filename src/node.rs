//! A running peer: key pair, registry, listener and discovery tasks
//!
//! Every background task is a child of the node's root cancellation token,
//! so [`Node::shutdown`] stops all of them.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::NodeConfig;
use crate::crypto::{KeyPair, PublicKey};
use crate::net::local_ipv4_or_loopback;
use crate::tcp::transfer::{self, Outgoing};
use crate::tcp::{cancellable, ChatSession, FileOffer, InboundRequest, PeerServer};
use crate::types::{ShareError, ShareResult, TransferProgress, TransferRecord, TransferStatus};
use crate::udp::{
    broadcast_presence, collect_peers, Announcement, DiscoveredPeer, DiscoveryListener,
    PeerRegistry,
};

const INBOUND_QUEUE_DEPTH: usize = 16;

/// Handle to a bound listener
#[derive(Debug)]
pub struct Listening {
    pub addr: SocketAddr,
    /// Inbound offers, in arrival order
    pub requests: mpsc::Receiver<InboundRequest>,
    pub task: JoinHandle<ShareResult<()>>,
}

pub struct Node {
    config: Arc<NodeConfig>,
    keys: Arc<KeyPair>,
    registry: PeerRegistry,
    history: Arc<Mutex<Vec<TransferRecord>>>,
    cancel: CancellationToken,
}

impl Node {
    /// Validate `config` and generate this node's key pair
    pub fn new(config: NodeConfig) -> ShareResult<Self> {
        config.validate()?;
        info!("Generating {}-bit key pair for {}", config.key_bits, config.username);
        let keys = KeyPair::generate(config.key_bits)?;
        Self::with_keys(config, keys)
    }

    /// Build a node around an existing key pair
    pub fn with_keys(config: NodeConfig, keys: KeyPair) -> ShareResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            keys: Arc::new(keys),
            registry: PeerRegistry::new(),
            history: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Child token for work the caller drives itself
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Bind the TCP listener and start accepting
    pub async fn listen(&self) -> ShareResult<Listening> {
        let server = PeerServer::bind(
            (Ipv4Addr::UNSPECIFIED, self.config.listen_port),
            self.config.username.clone(),
            self.keys.clone(),
        )
        .await?;
        let addr = server.local_addr()?;
        let (tx, requests) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let task = tokio::spawn(server.run(tx, self.cancel.child_token()));
        Ok(Listening {
            addr,
            requests,
            task,
        })
    }

    /// What this node announces for a listener on `listen_port`
    pub fn announcement(&self, listen_port: u16) -> Announcement {
        Announcement::new(
            self.config.username.clone(),
            listen_port,
            self.keys.public_key().clone(),
        )
    }

    /// Start announcing a listener on `listen_port`
    pub fn start_broadcast(&self, listen_port: u16) -> JoinHandle<ShareResult<()>> {
        let announcement = self.announcement(listen_port);
        let discovery = &self.config.discovery;
        let target = SocketAddr::new(IpAddr::V4(discovery.broadcast_addr), discovery.port);
        let interval = discovery.announce_interval;
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            broadcast_presence(&announcement, target, interval, cancel).await
        })
    }

    /// Bind the discovery port and keep the registry filled
    pub async fn start_scan(&self) -> ShareResult<JoinHandle<ShareResult<()>>> {
        let listener = DiscoveryListener::bind(self.config.discovery.port).await?;
        let registry = self.registry.clone();
        let window = self.config.discovery.collect_window;
        let username = self.config.username.clone();
        let local_ip = IpAddr::V4(local_ipv4_or_loopback());
        let cancel = self.cancel.child_token();

        Ok(tokio::spawn(async move {
            let is_self = |peer: &DiscoveredPeer| {
                peer.username == username
                    && (peer.addr.ip() == local_ip || peer.addr.ip().is_loopback())
            };
            listener.scan(&registry, window, is_self, cancel).await
        }))
    }

    /// Start periodic registry eviction
    pub fn start_eviction(&self) -> JoinHandle<ShareResult<()>> {
        let registry = self.registry.clone();
        let interval = self.config.discovery.eviction_interval;
        let timeout = self.config.discovery.peer_timeout;
        let cancel = self.cancel.child_token();
        tokio::spawn(async move { registry.run_eviction(interval, timeout, cancel).await })
    }

    /// Run one discovery window and merge the result into the registry
    pub async fn discover_once(&self) -> ShareResult<Vec<DiscoveredPeer>> {
        let discovery = &self.config.discovery;
        let peers = collect_peers(discovery.port, discovery.collect_window, &self.cancel).await?;
        for peer in &peers {
            self.registry.upsert(peer.clone()).await;
        }
        Ok(peers)
    }

    /// Look up a peer by username
    pub async fn find_peer(&self, username: &str) -> ShareResult<DiscoveredPeer> {
        self.registry
            .find_by_username(username)
            .await
            .ok_or_else(|| ShareError::PeerNotFound(username.to_string()))
    }

    /// Send the file at `path` to `peer`
    ///
    /// Every outcome, including an unreadable or empty source file, is
    /// appended to the transfer history.
    ///
    /// # Errors
    ///
    /// An empty or unreadable source file is [`ShareError::Validation`] /
    /// [`ShareError::Io`]; protocol outcomes are as for
    /// [`transfer::send_file`].
    pub async fn send_file<P>(
        &self,
        path: &Path,
        peer: &DiscoveredPeer,
        progress: P,
    ) -> ShareResult<TransferRecord>
    where
        P: FnMut(TransferProgress),
    {
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut size = 0u64;

        let cancel = self.cancel.child_token();
        let result = async {
            let filename = path.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
                ShareError::Validation(format!("not a UTF-8 file name: {}", path.display()))
            })?;

            let data = tokio::fs::read(path).await?;
            if data.is_empty() {
                return Err(ShareError::Validation(format!("{} is empty", path.display())));
            }
            size = data.len() as u64;

            info!(
                "Sending {:?} ({} bytes) to {} at {}",
                filename, size, peer.username, peer.addr
            );
            let mut stream = cancellable(&cancel, async {
                Ok::<_, ShareError>(TcpStream::connect(peer.addr).await?)
            })
            .await?;
            transfer::send_file(
                &mut stream,
                Outgoing {
                    filename,
                    sender: &self.config.username,
                    data: &data,
                    recipient: &peer.public_key,
                    chunk_size: self.config.chunk_size,
                },
                progress,
                &cancel,
            )
            .await
        }
        .await;

        let status = match &result {
            Ok(_) => TransferStatus::Sent,
            Err(ShareError::Rejected) => TransferStatus::Rejected,
            Err(e) if e.is_cancelled() => TransferStatus::Cancelled,
            Err(_) => TransferStatus::Failed,
        };
        let record = TransferRecord::new(
            display_name,
            size,
            self.config.username.clone(),
            peer.username.clone(),
            status,
            self.config.username.clone(),
        );
        self.record(record.clone()).await;

        result.map(|_| record)
    }

    /// Accept `offer` into `dest` and record the outcome
    ///
    /// Runs to completion on the calling task; the listen loop spawns one of
    /// these per accepted offer.
    pub async fn accept_offer<P>(
        &self,
        offer: FileOffer,
        dest: &Path,
        progress: P,
    ) -> ShareResult<TransferRecord>
    where
        P: FnMut(TransferProgress),
    {
        let filename = offer.filename().to_string();
        let sender = offer.sender().to_string();
        let cancel = self.cancel.child_token();
        let result = offer
            .accept(dest, &self.keys, self.config.chunk_size, progress, &cancel)
            .await;

        let record = match &result {
            Ok(record) => record.clone(),
            Err(e) => self.unfinished(filename, sender, e),
        };
        self.record(record).await;
        result
    }

    /// Reject `offer` and record the outcome
    pub async fn reject_offer(&self, offer: FileOffer) -> ShareResult<TransferRecord> {
        let filename = offer.filename().to_string();
        let sender = offer.sender().to_string();
        let result = offer.reject().await;

        let record = match &result {
            Ok(record) => record.clone(),
            Err(e) => self.unfinished(filename, sender, e),
        };
        self.record(record).await;
        result
    }

    /// Record for an inbound transfer that ended in `error`
    fn unfinished(&self, filename: String, sender: String, error: &ShareError) -> TransferRecord {
        let status = if error.is_cancelled() {
            TransferStatus::Cancelled
        } else {
            TransferStatus::Failed
        };
        TransferRecord::new(
            filename,
            0,
            sender,
            self.config.username.clone(),
            status,
            self.config.username.clone(),
        )
    }

    /// Open a chat with `peer`
    pub async fn start_chat(&self, peer: &DiscoveredPeer) -> ShareResult<ChatSession> {
        ChatSession::initiate(
            peer.addr,
            &self.config.username,
            &peer.username,
            &peer.public_key,
            self.cancel.child_token(),
        )
        .await
    }

    /// Append to the transfer history
    pub async fn record(&self, record: TransferRecord) {
        self.history.lock().await.push(record);
    }

    /// Transfers so far, oldest first
    pub async fn history(&self) -> Vec<TransferRecord> {
        self.history.lock().await.clone()
    }

    /// Cancel every task started by this node
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Shutting down node {}", self.config.username);
            self.cancel.cancel();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
