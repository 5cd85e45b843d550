//! Cryptographic error types

use thiserror::Error;

/// Errors raised by the cipher, public-key and hybrid engines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Symmetric key has the wrong length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Initialization vector has the wrong length
    #[error("Invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength {
        /// Expected IV length in bytes
        expected: usize,
        /// Actual IV length in bytes
        actual: usize,
    },

    /// Ciphertext is empty or not a whole number of blocks
    #[error("Invalid ciphertext length: {0} is not a positive multiple of the block size")]
    InvalidCiphertextLength(usize),

    /// Trailing pad count points outside the decrypted buffer
    #[error("Padding length {pad} exceeds decrypted length {len}")]
    InvalidPadding {
        /// Pad count read from the last byte
        pad: usize,
        /// Length of the decrypted buffer
        len: usize,
    },

    /// Value has no inverse modulo the given modulus
    #[error("No modular inverse: gcd of operands is not 1")]
    NoModularInverse,

    /// Requested modulus size cannot be generated
    #[error("Invalid key size: {0} bits")]
    InvalidKeySize(u64),

    /// Unwrapped session key is not valid key text
    #[error("Wrapped key did not decode to a session key: {0}")]
    InvalidWrappedKey(String),
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
