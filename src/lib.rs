//! # peershare - serverless LAN file transfer and chat
//!
//! Peers find each other with UDP broadcast, then talk directly over TCP:
//!
//! * **Discovery** broadcasts username, listen port and RSA public key
//! * **File transfer** wraps a fresh AES-256 session key under the
//!   receiver's public key and streams the CBC ciphertext
//! * **Chat** exchanges a wrapped session key once, then sends every message
//!   under a fresh IV
//!
//! All cryptography (SHA-256, AES-256-CBC, RSA) is implemented in
//! [`crypto`].
//!
//! ## Quick Start
//!
//! ```rust
//! use peershare::{Command, frame};
//!
//! let request = Command::Request {
//!     filename: "notes.txt".to_string(),
//!     encrypted_len: 32,
//!     sender: "alice".to_string(),
//! };
//!
//! // Encode to a frame
//! let encoded = frame::encode_frame(&request.to_bytes())?;
//!
//! // Decode it back
//! let mut buf = bytes::BytesMut::from(&encoded[..]);
//! let payload = frame::try_decode_frame(&mut buf, peershare::MAX_FRAME_LEN)?.unwrap();
//!
//! assert_eq!(Command::parse(&payload)?, request);
//! # Ok::<(), peershare::ShareError>(())
//! ```
//!
//! ## Protocol Overview
//!
//! Every TCP message is a frame:
//!
//! - LEN (4B LE): payload length
//! - PAYLOAD: command text or raw bytes (wrapped key, IV, ciphertext)
//!
//! | Command | Direction | Description |
//! |---------|-----------|-------------|
//! | `REQUEST:<file>:<len>:<sender>` | Sender → Receiver | Offer `len` encrypted bytes |
//! | `ACCEPT` / `REJECT` | Receiver → Sender | Operator decision |
//! | `ACK_SUCCESS` / `ACK_FAIL` | Receiver → Sender | Outcome after decryption |
//! | `CHAT_INIT:<username>` | Initiator → Responder | Open a chat; wrapped key follows |
//!
//! After `ACCEPT` the sender writes the wrapped key frame and the IV frame,
//! then the raw ciphertext without framing.
//!
//! Discovery datagrams are `DISCOVER:<user>:<port>:<b64 n>:<b64 e>` on a
//! shared UDP port.

pub mod auth;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod frame;
pub mod net;
pub mod node;
pub mod tcp;
pub mod types;
pub mod udp;

// Re-export main types for convenience
pub use types::{
    Command, ShareError, ShareResult, TransferProgress, TransferRecord, TransferStatus,
    DEFAULT_CHUNK_SIZE, DEFAULT_DISCOVERY_PORT, MAX_FRAME_LEN,
};

pub use codec::FrameCodec;
pub use config::{DiscoveryConfig, NodeConfig};
pub use frame::{encode_frame, try_decode_frame};
pub use node::{Listening, Node};
