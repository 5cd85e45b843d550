//! Encrypted chat sessions
//!
//! The initiator sends `CHAT_INIT:<username>` and then the session key
//! wrapped under the responder's public key. Afterwards every message is two
//! frames, IV then ciphertext, under that session key with a fresh IV.

use std::net::SocketAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancellable;
use crate::codec::FrameCodec;
use crate::crypto::symmetric::{self, Iv, SymmetricKey};
use crate::crypto::{hybrid, PublicKey};
use crate::frame::write_frame;
use crate::types::{Command, ShareError, ShareResult};

const EVENT_QUEUE_DEPTH: usize = 64;

/// A decrypted inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub from: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(ChatMessage),
    /// The peer closed the connection or the stream failed. Always the last event.
    Disconnected,
}

/// Sending half of a chat session
#[derive(Debug)]
pub struct ChatSender {
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    key: SymmetricKey,
}

impl ChatSender {
    /// Encrypt `text` under a fresh IV and send it as (IV, ciphertext)
    pub async fn send(&mut self, text: &str) -> ShareResult<()> {
        let (ciphertext, iv) = symmetric::encrypt(text.as_bytes(), &self.key);
        self.writer.feed(Bytes::copy_from_slice(iv.as_bytes())).await?;
        self.writer.send(Bytes::from(ciphertext)).await?;
        Ok(())
    }

    /// Flush and shut down the write half
    pub async fn close(mut self) -> ShareResult<()> {
        self.writer.close().await
    }
}

/// An established chat session
#[derive(Debug)]
pub struct ChatSession {
    peer: String,
    peer_addr: SocketAddr,
    sender: ChatSender,
    events: mpsc::Receiver<ChatEvent>,
}

impl ChatSession {
    /// Connect to `addr` and open a chat with `peer_username`
    pub async fn initiate(
        addr: SocketAddr,
        username: &str,
        peer_username: &str,
        peer_key: &PublicKey,
        cancel: CancellationToken,
    ) -> ShareResult<Self> {
        let mut stream = cancellable(&cancel, async {
            Ok::<_, ShareError>(TcpStream::connect(addr).await?)
        })
        .await?;

        let init = Command::ChatInit {
            username: username.to_string(),
        };
        write_frame(&mut stream, &init.to_bytes()).await?;

        let key = SymmetricKey::generate();
        write_frame(&mut stream, &hybrid::wrap_key(&key, peer_key)).await?;

        info!("Chat with {} at {} started", peer_username, addr);
        Ok(Self::start(stream, addr, key, peer_username.to_string(), cancel))
    }

    fn start(
        stream: TcpStream,
        peer_addr: SocketAddr,
        key: SymmetricKey,
        peer: String,
        cancel: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (tx, events) = mpsc::channel(EVENT_QUEUE_DEPTH);

        tokio::spawn(receive_loop(
            FramedRead::new(read_half, FrameCodec::default()),
            key.clone(),
            peer.clone(),
            tx,
            cancel,
        ));

        Self {
            peer,
            peer_addr,
            sender: ChatSender {
                writer: FramedWrite::new(write_half, FrameCodec::default()),
                key,
            },
            events,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, text: &str) -> ShareResult<()> {
        self.sender.send(text).await
    }

    /// Next inbound event; `None` once the receive loop has finished
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Split into independently usable send and receive ends
    pub fn into_parts(self) -> (ChatSender, mpsc::Receiver<ChatEvent>) {
        (self.sender, self.events)
    }

    /// Close our side; the peer sees a disconnect
    pub async fn close(self) -> ShareResult<()> {
        info!("Closing chat with {}", self.peer);
        self.sender.close().await
    }
}

async fn receive_loop(
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    key: SymmetricKey,
    peer: String,
    events: mpsc::Sender<ChatEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Chat with {} cancelled", peer);
                break;
            }
            next = read_message(&mut reader, &key) => next,
        };

        match next {
            Ok(Some(text)) => {
                let message = ChatMessage {
                    from: peer.clone(),
                    text,
                    received_at: Utc::now(),
                };
                if events.send(ChatEvent::Message(message)).await.is_err() {
                    debug!("Chat events for {} no longer consumed", peer);
                    break;
                }
            }
            Ok(None) => {
                info!("{} closed the chat", peer);
                break;
            }
            Err(e) => {
                warn!("Chat with {} failed: {}", peer, e);
                break;
            }
        }
    }
    let _ = events.send(ChatEvent::Disconnected).await;
}

/// Read one (IV, ciphertext) pair; `Ok(None)` on a clean close between messages
async fn read_message(
    reader: &mut FramedRead<OwnedReadHalf, FrameCodec>,
    key: &SymmetricKey,
) -> ShareResult<Option<String>> {
    let iv = match reader.try_next().await? {
        Some(iv) => Iv::from_bytes(&iv)?,
        None => return Ok(None),
    };
    let ciphertext = reader.try_next().await?.ok_or(ShareError::ConnectionClosed)?;
    let plaintext = symmetric::decrypt(&ciphertext, key, &iv)?;
    Ok(Some(String::from_utf8_lossy(&plaintext).into_owned()))
}

/// Inbound chat request with the session key already unwrapped
#[derive(Debug)]
pub struct ChatOffer {
    peer_username: String,
    peer_addr: SocketAddr,
    stream: TcpStream,
    key: SymmetricKey,
}

impl ChatOffer {
    pub(crate) fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        peer_username: String,
        key: SymmetricKey,
    ) -> Self {
        Self {
            peer_username,
            peer_addr,
            stream,
            key,
        }
    }

    pub fn peer_username(&self) -> &str {
        &self.peer_username
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Start the session
    pub fn accept(self, cancel: CancellationToken) -> ChatSession {
        info!("Accepted chat from {} at {}", self.peer_username, self.peer_addr);
        ChatSession::start(self.stream, self.peer_addr, self.key, self.peer_username, cancel)
    }

    /// Close the connection without answering
    pub async fn reject(mut self) -> ShareResult<()> {
        info!("Rejected chat from {} at {}", self.peer_username, self.peer_addr);
        self.stream.shutdown().await?;
        Ok(())
    }
}
