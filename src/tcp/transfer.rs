//! File transfer state machine
//!
//! ```text
//! Idle -> RequestSent -> AwaitDecision -> Rejected
//!                                      -> KeyExchange -> Streaming -> Acknowledging -> Done
//! ```
//!
//! Any non-terminal state may also move to `Failed` or `Cancelled`. After
//! `ACCEPT` the sender writes the wrapped key and IV frames, then the raw
//! ciphertext in chunks with no framing; the receiver knows the total from the
//! request. The receiver always answers with `ACK_SUCCESS` or `ACK_FAIL` once
//! it has accepted.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancellable;
use crate::crypto::symmetric::Iv;
use crate::crypto::{hybrid, KeyPair, PublicKey};
use crate::frame::{read_frame, write_frame};
use crate::types::{
    Command, ShareError, ShareResult, TransferProgress, TransferRecord, TransferStatus,
};

/// Upper bound on the receive buffer reserved up front
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Name used when a received filename has no usable final component
const FALLBACK_FILENAME: &str = "received.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    RequestSent,
    AwaitDecision,
    Rejected,
    KeyExchange,
    Streaming,
    Acknowledging,
    Done,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Rejected
                | TransferState::Done
                | TransferState::Failed
                | TransferState::Cancelled
        )
    }

    fn can_advance_to(self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Idle, RequestSent)
            | (RequestSent, AwaitDecision)
            | (AwaitDecision, Rejected)
            | (AwaitDecision, KeyExchange)
            | (KeyExchange, Streaming)
            | (Streaming, Acknowledging)
            | (Acknowledging, Done) => true,
            (from, Failed) | (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Per-connection transfer state, shared by both ends
#[derive(Debug, Clone)]
pub struct TransferSession {
    filename: String,
    encrypted_len: u64,
    transferred: u64,
    state: TransferState,
}

impl TransferSession {
    pub fn new(filename: impl Into<String>, encrypted_len: u64) -> Self {
        Self {
            filename: filename.into(),
            encrypted_len,
            transferred: 0,
            state: TransferState::Idle,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn encrypted_len(&self) -> u64 {
        self.encrypted_len
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            transferred: self.transferred,
            total: self.encrypted_len,
        }
    }

    /// Move to `next`, refusing transitions the protocol does not allow
    pub fn advance(&mut self, next: TransferState) -> ShareResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(ShareError::Protocol(format!(
                "illegal transfer transition {:?} -> {:?}",
                self.state, next
            )));
        }
        debug!("Transfer {:?}: {:?} -> {:?}", self.filename, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Count streamed bytes
    pub fn record(&mut self, bytes: usize) -> TransferProgress {
        self.transferred += bytes as u64;
        self.progress()
    }

    /// Settle a failed session as `Cancelled` or `Failed`
    pub fn fail(&mut self, error: &ShareError) {
        let next = if error.is_cancelled() {
            TransferState::Cancelled
        } else {
            TransferState::Failed
        };
        if self.state.can_advance_to(next) {
            self.state = next;
        }
    }
}

/// What the sending side offers
#[derive(Debug, Clone, Copy)]
pub struct Outgoing<'a> {
    /// Name announced in the request (final path component only)
    pub filename: &'a str,
    /// Local username placed in the request
    pub sender: &'a str,
    pub data: &'a [u8],
    pub recipient: &'a PublicKey,
    pub chunk_size: usize,
}

/// Run the sending half of a transfer over `stream`
///
/// Returns the number of encrypted bytes streamed.
///
/// # Errors
///
/// [`ShareError::Rejected`] if the reply is anything but `ACCEPT` (no
/// payload is sent), [`ShareError::RemoteFailure`] if the final reply is
/// anything but `ACK_SUCCESS`, [`ShareError::Cancelled`] when `cancel` fires.
pub async fn send_file<S, P>(
    stream: &mut S,
    outgoing: Outgoing<'_>,
    mut progress: P,
    cancel: &CancellationToken,
) -> ShareResult<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: FnMut(TransferProgress),
{
    if outgoing.chunk_size == 0 {
        return Err(ShareError::Validation("chunk_size must be non-zero".to_string()));
    }

    let payload = hybrid::encrypt(outgoing.data, outgoing.recipient);
    let total = payload.ciphertext.len() as u64;
    let mut session = TransferSession::new(outgoing.filename, total);

    let result = drive_send(stream, &mut session, &outgoing, &payload, &mut progress, cancel).await;
    match &result {
        Ok(_) => info!(
            "Sent {:?} ({} encrypted bytes) as {}",
            outgoing.filename, total, outgoing.sender
        ),
        Err(e) => {
            session.fail(e);
            warn!("Sending {:?} ended in {:?}: {}", outgoing.filename, session.state(), e);
        }
    }
    result
}

async fn drive_send<S, P>(
    stream: &mut S,
    session: &mut TransferSession,
    outgoing: &Outgoing<'_>,
    payload: &hybrid::HybridPayload,
    progress: &mut P,
    cancel: &CancellationToken,
) -> ShareResult<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: FnMut(TransferProgress),
{
    let request = Command::Request {
        filename: outgoing.filename.to_string(),
        encrypted_len: session.encrypted_len(),
        sender: outgoing.sender.to_string(),
    };
    cancellable(cancel, write_frame(stream, &request.to_bytes())).await?;
    session.advance(TransferState::RequestSent)?;

    session.advance(TransferState::AwaitDecision)?;
    let reply = cancellable(cancel, read_frame(stream)).await?;
    if !matches!(Command::parse(&reply), Ok(Command::Accept)) {
        session.advance(TransferState::Rejected)?;
        return Err(ShareError::Rejected);
    }

    session.advance(TransferState::KeyExchange)?;
    cancellable(cancel, write_frame(stream, &payload.wrapped_key)).await?;
    cancellable(cancel, write_frame(stream, payload.iv.as_bytes())).await?;

    session.advance(TransferState::Streaming)?;
    for chunk in payload.ciphertext.chunks(outgoing.chunk_size) {
        if cancel.is_cancelled() {
            return Err(ShareError::Cancelled);
        }
        cancellable(cancel, async {
            stream.write_all(chunk).await?;
            Ok::<_, ShareError>(())
        })
        .await?;
        progress(session.record(chunk.len()));
    }
    cancellable(cancel, async {
        stream.flush().await?;
        Ok::<_, ShareError>(())
    })
    .await?;

    session.advance(TransferState::Acknowledging)?;
    let ack = cancellable(cancel, read_frame(stream)).await?;
    match Command::parse(&ack) {
        Ok(Command::AckSuccess) => {
            session.advance(TransferState::Done)?;
            Ok(session.encrypted_len())
        }
        Ok(Command::AckFail) => Err(ShareError::RemoteFailure(
            "receiver could not decrypt or store the file".to_string(),
        )),
        _ => Err(ShareError::RemoteFailure(format!(
            "unexpected acknowledgement {:?}",
            String::from_utf8_lossy(&ack)
        ))),
    }
}

/// Final path component of a received filename
///
/// Both `/` and `\` count as separators; empty, `.` and `..` names fall back
/// to a fixed name.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match last {
        "" | "." | ".." => FALLBACK_FILENAME.to_string(),
        other => other.to_string(),
    }
}

/// Inbound file offer waiting for the operator's decision
#[derive(Debug)]
pub struct FileOffer {
    session: TransferSession,
    sender: String,
    receiver: String,
    peer_addr: SocketAddr,
    stream: TcpStream,
}

impl FileOffer {
    pub(crate) fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        filename: &str,
        encrypted_len: u64,
        sender: String,
        receiver: String,
    ) -> ShareResult<Self> {
        let mut session = TransferSession::new(sanitize_filename(filename), encrypted_len);
        session.advance(TransferState::RequestSent)?;
        session.advance(TransferState::AwaitDecision)?;
        Ok(Self {
            session,
            sender,
            receiver,
            peer_addr,
            stream,
        })
    }

    /// Sanitized filename
    pub fn filename(&self) -> &str {
        self.session.filename()
    }

    pub fn encrypted_len(&self) -> u64 {
        self.session.encrypted_len()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Where the file lands inside `dir`
    pub fn destination_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.filename())
    }

    /// Accept, receive, decrypt and write the file to `dest`
    ///
    /// An acknowledgement is sent on every exit path after `ACCEPT`.
    pub async fn accept<P>(
        mut self,
        dest: &Path,
        keys: &KeyPair,
        chunk_size: usize,
        progress: P,
        cancel: &CancellationToken,
    ) -> ShareResult<TransferRecord>
    where
        P: FnMut(TransferProgress),
    {
        info!(
            "Accepting {:?} ({} bytes) from {} at {}",
            self.filename(),
            self.encrypted_len(),
            self.sender,
            self.peer_addr
        );
        let size = receive_file(
            &mut self.stream,
            &mut self.session,
            dest,
            keys,
            chunk_size,
            progress,
            cancel,
        )
        .await?;

        Ok(TransferRecord::new(
            self.session.filename(),
            size,
            self.sender,
            self.receiver.clone(),
            TransferStatus::Received,
            self.receiver,
        ))
    }

    /// Answer `REJECT` and close the connection
    pub async fn reject(mut self) -> ShareResult<TransferRecord> {
        info!("Rejecting {:?} from {}", self.filename(), self.sender);
        write_frame(&mut self.stream, &Command::Reject.to_bytes()).await?;
        self.session.advance(TransferState::Rejected)?;
        let _ = self.stream.shutdown().await;

        Ok(TransferRecord::new(
            self.session.filename(),
            0,
            self.sender,
            self.receiver.clone(),
            TransferStatus::Rejected,
            self.receiver,
        ))
    }
}

/// Receiving half after the operator said yes
///
/// Returns the plaintext size written to `dest`.
pub(crate) async fn receive_file<S, P>(
    stream: &mut S,
    session: &mut TransferSession,
    dest: &Path,
    keys: &KeyPair,
    chunk_size: usize,
    mut progress: P,
    cancel: &CancellationToken,
) -> ShareResult<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: FnMut(TransferProgress),
{
    if chunk_size == 0 {
        cancellable(cancel, write_frame(stream, &Command::Reject.to_bytes())).await?;
        session.advance(TransferState::Rejected)?;
        return Err(ShareError::Validation("chunk_size must be non-zero".to_string()));
    }

    session.advance(TransferState::KeyExchange)?;
    cancellable(cancel, write_frame(stream, &Command::Accept.to_bytes())).await?;

    let outcome =
        receive_and_store(stream, session, dest, keys, chunk_size, &mut progress, cancel).await;

    let ack = match outcome {
        Ok(_) => Command::AckSuccess,
        Err(_) => Command::AckFail,
    };
    if let Err(e) = write_frame(stream, &ack.to_bytes()).await {
        warn!("Failed to send {} for {:?}: {}", ack, session.filename(), e);
    }

    match &outcome {
        Ok(size) => {
            session.advance(TransferState::Done)?;
            info!("Received {:?} ({} bytes) into {}", session.filename(), size, dest.display());
        }
        Err(e) => {
            session.fail(e);
            warn!("Receiving {:?} ended in {:?}: {}", session.filename(), session.state(), e);
        }
    }
    outcome
}

async fn receive_and_store<S, P>(
    stream: &mut S,
    session: &mut TransferSession,
    dest: &Path,
    keys: &KeyPair,
    chunk_size: usize,
    progress: &mut P,
    cancel: &CancellationToken,
) -> ShareResult<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: FnMut(TransferProgress),
{
    let wrapped_key = cancellable(cancel, read_frame(stream)).await?;
    let iv = Iv::from_bytes(&cancellable(cancel, read_frame(stream)).await?)?;

    session.advance(TransferState::Streaming)?;
    let total = session.encrypted_len();
    let mut ciphertext = Vec::with_capacity(total.min(MAX_PREALLOC) as usize);
    let mut buf = vec![0u8; chunk_size];
    while (ciphertext.len() as u64) < total {
        let want = (total - ciphertext.len() as u64).min(chunk_size as u64) as usize;
        let n = cancellable(cancel, async {
            let n = stream.read(&mut buf[..want]).await?;
            Ok::<_, ShareError>(n)
        })
        .await?;
        if n == 0 {
            return Err(ShareError::ConnectionClosed);
        }
        ciphertext.extend_from_slice(&buf[..n]);
        progress(session.record(n));
    }

    session.advance(TransferState::Acknowledging)?;
    let plaintext = hybrid::decrypt(&ciphertext, &wrapped_key, &iv, keys)?;

    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(dest, &plaintext).await?;
    Ok(plaintext.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa::DEFAULT_KEY_BITS;
    use crate::crypto::symmetric;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("peershare-transfer-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut session = TransferSession::new("a.txt", 32);
        for next in [
            TransferState::RequestSent,
            TransferState::AwaitDecision,
            TransferState::KeyExchange,
            TransferState::Streaming,
            TransferState::Acknowledging,
            TransferState::Done,
        ] {
            session.advance(next).unwrap();
        }
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut session = TransferSession::new("a.txt", 32);
        assert!(session.advance(TransferState::Streaming).is_err());
        session.advance(TransferState::RequestSent).unwrap();
        session.advance(TransferState::AwaitDecision).unwrap();
        session.advance(TransferState::Rejected).unwrap();
        assert!(session.advance(TransferState::KeyExchange).is_err());

        // terminal states are sticky
        session.fail(&ShareError::ConnectionClosed);
        assert_eq!(session.state(), TransferState::Rejected);
    }

    #[test]
    fn test_fail_distinguishes_cancellation() {
        let mut a = TransferSession::new("a", 16);
        a.advance(TransferState::RequestSent).unwrap();
        a.fail(&ShareError::Cancelled);
        assert_eq!(a.state(), TransferState::Cancelled);

        let mut b = TransferSession::new("b", 16);
        b.fail(&ShareError::ConnectionClosed);
        assert_eq!(b.state(), TransferState::Failed);
    }

    #[test]
    fn test_progress_accumulates() {
        let mut session = TransferSession::new("a", 20000);
        session.record(8192);
        let p = session.record(8192);
        assert_eq!(p, TransferProgress { transferred: 16384, total: 20000 });
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\bob\\notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename(".."), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("dir/"), FALLBACK_FILENAME);
    }

    #[tokio::test]
    async fn test_send_and_receive_over_duplex() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
        let dest = temp_path("duplex.bin");
        let (mut a, mut b) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();

        let recv_keys = keys.clone();
        let recv_dest = dest.clone();
        let recv_cancel = cancel.clone();
        let receiver = tokio::spawn(async move {
            let request = Command::parse(&read_frame(&mut b).await.unwrap()).unwrap();
            let Command::Request { filename, encrypted_len, sender } = request else {
                panic!("expected a request");
            };
            assert_eq!(filename, "duplex.bin");
            assert_eq!(sender, "alice");

            let mut session = TransferSession::new(filename, encrypted_len);
            session.advance(TransferState::RequestSent).unwrap();
            session.advance(TransferState::AwaitDecision).unwrap();
            let mut updates = Vec::new();
            let size = receive_file(
                &mut b,
                &mut session,
                &recv_dest,
                &recv_keys,
                8192,
                |p| updates.push(p),
                &recv_cancel,
            )
            .await
            .unwrap();
            assert_eq!(session.state(), TransferState::Done);
            (size, encrypted_len, updates)
        });

        let mut sent_progress = Vec::new();
        let sent = send_file(
            &mut a,
            Outgoing {
                filename: "duplex.bin",
                sender: "alice",
                data: &data,
                recipient: keys.public_key(),
                chunk_size: 8192,
            },
            |p| sent_progress.push(p),
            &cancel,
        )
        .await
        .unwrap();

        let (size, encrypted_len, updates) = receiver.await.unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(sent, symmetric::ciphertext_len(data.len()) as u64);
        assert_eq!(encrypted_len, sent);
        assert_eq!(sent_progress.len(), 3);
        assert_eq!(sent_progress.last().unwrap().transferred, sent);
        assert_eq!(updates.last().unwrap().transferred, sent);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        let _ = tokio::fs::remove_file(&dest).await;
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_rejection() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let (mut a, mut b) = tokio::io::duplex(4096);

        let receiver = tokio::spawn(async move {
            read_frame(&mut b).await.unwrap();
            write_frame(&mut b, b"MAYBE").await.unwrap();
            // nothing else may arrive
            let mut rest = Vec::new();
            b.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let mut streamed = 0;
        let result = send_file(
            &mut a,
            Outgoing {
                filename: "a.txt",
                sender: "alice",
                data: b"payload",
                recipient: keys.public_key(),
                chunk_size: 8192,
            },
            |_| streamed += 1,
            &CancellationToken::new(),
        )
        .await;
        drop(a);

        assert!(matches!(result, Err(ShareError::Rejected)));
        assert_eq!(streamed, 0);
        assert!(receiver.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_reply() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let (mut a, _b) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = send_file(
            &mut a,
            Outgoing {
                filename: "a.txt",
                sender: "alice",
                data: b"payload",
                recipient: keys.public_key(),
                chunk_size: 8192,
            },
            |_| {},
            &cancel,
        )
        .await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let (mut a, _b) = tokio::io::duplex(64);
        let result = send_file(
            &mut a,
            Outgoing {
                filename: "a.txt",
                sender: "alice",
                data: b"x",
                recipient: keys.public_key(),
                chunk_size: 0,
            },
            |_| {},
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ShareError::Validation(_))));
    }

    fn awaiting_session(encrypted_len: u64) -> TransferSession {
        let mut session = TransferSession::new("a.bin", encrypted_len);
        session.advance(TransferState::RequestSent).unwrap();
        session.advance(TransferState::AwaitDecision).unwrap();
        session
    }

    #[tokio::test]
    async fn test_receiver_zero_chunk_answers_reject() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut session = awaiting_session(16);

        let result = receive_file(
            &mut b,
            &mut session,
            &temp_path("never.bin"),
            &keys,
            0,
            |_| {},
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(ShareError::Validation(_))));
        assert_eq!(session.state(), TransferState::Rejected);
        let reply = read_frame(&mut a).await.unwrap();
        assert_eq!(Command::parse(&reply).unwrap(), Command::Reject);
    }

    #[tokio::test]
    async fn test_receiver_cancelled_while_streaming() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let (mut a, mut b) = tokio::io::duplex(8192);
        let cancel = CancellationToken::new();
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();

        let recv_cancel = cancel.clone();
        let receiver = tokio::spawn(async move {
            let mut session = awaiting_session(4096);
            let result = receive_file(
                &mut b,
                &mut session,
                &temp_path("cancelled.bin"),
                &keys,
                8192,
                |p| {
                    let _ = seen_tx.send(p.transferred);
                },
                &recv_cancel,
            )
            .await;
            (result, session.state())
        });

        let reply = read_frame(&mut a).await.unwrap();
        assert_eq!(Command::parse(&reply).unwrap(), Command::Accept);
        write_frame(&mut a, &[7u8; 64]).await.unwrap();
        write_frame(&mut a, &[0u8; 16]).await.unwrap();
        a.write_all(&[1u8; 100]).await.unwrap();

        while let Some(transferred) = seen_rx.recv().await {
            if transferred == 100 {
                break;
            }
        }
        cancel.cancel();

        let (result, state) = receiver.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(state, TransferState::Cancelled);
        let ack = read_frame(&mut a).await.unwrap();
        assert_eq!(Command::parse(&ack).unwrap(), Command::AckFail);
        assert!(!temp_path("cancelled.bin").exists());
    }

    #[tokio::test]
    async fn test_sender_cancelled_between_chunks() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let (mut a, mut b) = tokio::io::duplex(16 * 1024);
        let cancel = CancellationToken::new();

        let receiver = tokio::spawn(async move {
            read_frame(&mut b).await.unwrap();
            write_frame(&mut b, &Command::Accept.to_bytes()).await.unwrap();
            read_frame(&mut b).await.unwrap();
            read_frame(&mut b).await.unwrap();
            let mut streamed = Vec::new();
            b.read_to_end(&mut streamed).await.unwrap();
            streamed.len()
        });

        let trigger = cancel.clone();
        let mut updates = 0;
        let result = send_file(
            &mut a,
            Outgoing {
                filename: "big.bin",
                sender: "alice",
                data: &[3u8; 5000],
                recipient: keys.public_key(),
                chunk_size: 1024,
            },
            |_| {
                updates += 1;
                trigger.cancel();
            },
            &cancel,
        )
        .await;
        drop(a);

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(updates, 1);
        assert_eq!(receiver.await.unwrap(), 1024);
    }
}
