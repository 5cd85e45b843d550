//! Cryptographic primitives
//!
//! Everything here is implemented in-crate and is pure, synchronous code:
//! - `sha256`: message digest
//! - `aes`: AES-256 block cipher and key schedule
//! - `symmetric`: CBC mode with PKCS#7 padding, session keys and IVs
//! - `rsa`: textbook RSA key generation and encryption
//! - `hybrid`: RSA-wrapped session keys over AES-CBC payloads

pub mod aes;
pub mod error;
pub mod hybrid;
pub mod rsa;
pub mod sha256;
pub mod symmetric;

pub use error::{CryptoError, CryptoResult};
pub use hybrid::HybridPayload;
pub use rsa::{KeyPair, PublicKey};
pub use sha256::Sha256;
pub use symmetric::{Iv, SymmetricKey};
