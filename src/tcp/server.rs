use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cancellable;
use super::chat::ChatOffer;
use super::transfer::FileOffer;
use crate::crypto::{hybrid, KeyPair};
use crate::frame::read_frame;
use crate::types::{Command, ShareError, ShareResult};

/// Inbound request waiting for the application's decision
#[derive(Debug)]
pub enum InboundRequest {
    File(FileOffer),
    Chat(ChatOffer),
}

/// TCP listener for inbound transfers and chats
pub struct PeerServer {
    listener: TcpListener,
    username: String,
    keys: Arc<KeyPair>,
    next_session_id: Arc<AtomicU64>,
}

impl PeerServer {
    /// Bind to the specified address
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        username: impl Into<String>,
        keys: Arc<KeyPair>,
    ) -> ShareResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Peer server bound to {}", listener.local_addr()?);

        Ok(Self {
            listener,
            username: username.into(),
            keys,
            next_session_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Get the local address this server is bound to
    pub fn local_addr(&self) -> ShareResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires, queueing each parsed request
    ///
    /// Returns [`ShareError::Cancelled`] on cancellation.
    pub async fn run(
        self,
        offers: mpsc::Sender<InboundRequest>,
        cancel: CancellationToken,
    ) -> ShareResult<()> {
        info!("Peer server starting...");

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Peer server stopped");
                    return Err(ShareError::Cancelled);
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, addr)) => {
                    let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                    info!("New connection {} from {}", session_id, addr);

                    let username = self.username.clone();
                    let keys = self.keys.clone();
                    let offers = offers.clone();
                    let cancel = cancel.clone();

                    tokio::spawn(async move {
                        let handled =
                            Self::handle_connection(socket, addr, username, keys, offers, cancel);
                        if let Err(e) = handled.await {
                            error!("Connection {} error: {}", session_id, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Read the opening command and turn the connection into an offer
    async fn handle_connection(
        mut socket: TcpStream,
        addr: SocketAddr,
        username: String,
        keys: Arc<KeyPair>,
        offers: mpsc::Sender<InboundRequest>,
        cancel: CancellationToken,
    ) -> ShareResult<()> {
        let opening = cancellable(&cancel, read_frame(&mut socket)).await?;

        let request = match Command::parse(&opening)? {
            Command::Request {
                filename,
                encrypted_len,
                sender,
            } => {
                info!(
                    "File offer {:?} ({} bytes) from {} at {}",
                    filename, encrypted_len, sender, addr
                );
                InboundRequest::File(FileOffer::new(
                    socket,
                    addr,
                    &filename,
                    encrypted_len,
                    sender,
                    username,
                )?)
            }
            Command::ChatInit { username: peer } => {
                let wrapped = cancellable(&cancel, read_frame(&mut socket)).await?;
                let key = hybrid::unwrap_key(&wrapped, &keys)?;
                info!("Chat request from {} at {}", peer, addr);
                InboundRequest::Chat(ChatOffer::new(socket, addr, peer, key))
            }
            other => {
                return Err(ShareError::Protocol(format!(
                    "unexpected opening command {} from {}",
                    other, addr
                )));
            }
        };

        if offers.send(request).await.is_err() {
            warn!("No consumer for inbound requests; dropping connection from {}", addr);
        } else {
            debug!("Queued inbound request from {}", addr);
        }
        Ok(())
    }
}
