//! Wire commands, shared value types and the crate error

use std::fmt;
use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::CryptoError;

/// Length of the frame header in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest frame payload accepted from the wire (16 MiB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Raw ciphertext streaming chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Shared UDP port for discovery announcements
pub const DEFAULT_DISCOVERY_PORT: u16 = 12345;

/// Field separator used by every text command
pub const FIELD_SEPARATOR: char = ':';

/// Errors surfaced by the transport, protocol and node layers
#[derive(Error, Debug)]
pub enum ShareError {
    /// Malformed or unexpected command
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection before a read was satisfied
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Declared frame length exceeds [`MAX_FRAME_LEN`]
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Encryption or decryption failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The receiver answered something other than ACCEPT
    #[error("Transfer rejected by receiver")]
    Rejected,

    /// The receiver could not decrypt or store the payload
    #[error("Receiver reported failure: {0}")]
    RemoteFailure(String),

    /// Bad input from the operator or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Named peer is not in the registry
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Operation stopped by its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl ShareError {
    /// True when the operation ended through cancellation rather than failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ShareError::Cancelled)
    }

    /// True for outcomes that are a normal "no" rather than a fault
    pub fn is_negative_outcome(&self) -> bool {
        matches!(self, ShareError::Rejected | ShareError::Validation(_))
    }
}

/// Result type for protocol and node operations
pub type ShareResult<T> = Result<T, ShareError>;

/// Text commands exchanged as frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `REQUEST:<filename>:<encryptedLength>:<sender>`
    Request {
        filename: String,
        encrypted_len: u64,
        sender: String,
    },
    /// `CHAT_INIT:<username>`
    ChatInit { username: String },
    /// `ACCEPT`
    Accept,
    /// `REJECT`
    Reject,
    /// `ACK_SUCCESS`
    AckSuccess,
    /// `ACK_FAIL`
    AckFail,
}

impl Command {
    const REQUEST: &'static str = "REQUEST";
    const CHAT_INIT: &'static str = "CHAT_INIT";
    const ACCEPT: &'static str = "ACCEPT";
    const REJECT: &'static str = "REJECT";
    const ACK_SUCCESS: &'static str = "ACK_SUCCESS";
    const ACK_FAIL: &'static str = "ACK_FAIL";

    /// Encode as frame payload bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a frame payload
    ///
    /// The request sender and length are split off from the right, so
    /// filenames may contain `:` while usernames may not.
    pub fn parse(payload: &[u8]) -> ShareResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| ShareError::Protocol("command is not valid UTF-8".to_string()))?;

        let (name, rest) = match text.split_once(FIELD_SEPARATOR) {
            Some((name, rest)) => (name, Some(rest)),
            None => (text, None),
        };

        match (name, rest) {
            (Self::REQUEST, Some(rest)) => Self::parse_request(rest),
            (Self::CHAT_INIT, Some(username)) => {
                if username.is_empty() || username.contains(FIELD_SEPARATOR) {
                    return Err(ShareError::Protocol(format!("bad chat username: {:?}", username)));
                }
                Ok(Command::ChatInit {
                    username: username.to_string(),
                })
            }
            (Self::ACCEPT, None) => Ok(Command::Accept),
            (Self::REJECT, None) => Ok(Command::Reject),
            (Self::ACK_SUCCESS, None) => Ok(Command::AckSuccess),
            (Self::ACK_FAIL, None) => Ok(Command::AckFail),
            _ => Err(ShareError::Protocol(format!("unknown command: {:?}", truncate(text)))),
        }
    }

    fn parse_request(rest: &str) -> ShareResult<Self> {
        let malformed = || ShareError::Protocol(format!("malformed request: {:?}", truncate(rest)));

        let (head, sender) = rest.rsplit_once(FIELD_SEPARATOR).ok_or_else(malformed)?;
        let (filename, len) = head.rsplit_once(FIELD_SEPARATOR).ok_or_else(malformed)?;
        let encrypted_len = len.parse::<u64>().map_err(|_| malformed())?;
        if filename.is_empty() || sender.is_empty() {
            return Err(malformed());
        }

        Ok(Command::Request {
            filename: filename.to_string(),
            encrypted_len,
            sender: sender.to_string(),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Request {
                filename,
                encrypted_len,
                sender,
            } => write!(f, "{}:{}:{}:{}", Self::REQUEST, filename, encrypted_len, sender),
            Command::ChatInit { username } => write!(f, "{}:{}", Self::CHAT_INIT, username),
            Command::Accept => f.write_str(Self::ACCEPT),
            Command::Reject => f.write_str(Self::REJECT),
            Command::AckSuccess => f.write_str(Self::ACK_SUCCESS),
            Command::AckFail => f.write_str(Self::ACK_FAIL),
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(64).collect()
}

/// Progress of a streaming transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Encrypted bytes moved so far
    pub transferred: u64,
    /// Total encrypted bytes
    pub total: u64,
}

impl TransferProgress {
    /// Completion as a fraction in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.transferred as f64 / self.total as f64
        }
    }
}

/// Outcome recorded for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Sent,
    Received,
    Rejected,
    Failed,
    Cancelled,
}

/// Transfer log entry handed to whoever persists history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub filename: String,
    /// Plaintext size in bytes
    pub size: u64,
    pub sender: String,
    pub receiver: String,
    pub status: TransferStatus,
    /// Local user the record belongs to
    pub owner: String,
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord {
    /// Record stamped with the current time
    pub fn new(
        filename: impl Into<String>,
        size: u64,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        status: TransferStatus,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            size,
            sender: sender.into(),
            receiver: receiver.into(),
            status,
            owner: owner.into(),
            timestamp: Utc::now(),
        }
    }
}
