//! AES-256-CBC with PKCS#7 padding
//!
//! Session keys and IVs are drawn from the OS RNG. There is no
//! authentication tag: a corrupted ciphertext decrypts to garbage rather
//! than failing, and only a pad count pointing outside the buffer is
//! reported as an error.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use super::aes::{self, Block, KeySchedule, BLOCK_SIZE};
use super::error::{CryptoError, CryptoResult};

/// Size of a session key in bytes (256 bits)
pub const KEY_SIZE: usize = aes::KEY_SIZE;

/// Size of an initialization vector in bytes
pub const IV_SIZE: usize = BLOCK_SIZE;

/// A 256-bit session key
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a key from raw bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Textual form used when the key is wrapped for transport (base64)
    pub fn to_text(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Parse the textual form produced by [`SymmetricKey::to_text`]
    pub fn from_text(text: &str) -> CryptoResult<Self> {
        let raw = BASE64
            .decode(text.trim())
            .map_err(|e| CryptoError::InvalidWrappedKey(e.to_string()))?;
        Self::from_bytes(&raw)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// A 128-bit initialization vector
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Iv {
    bytes: [u8; IV_SIZE],
}

impl Iv {
    /// Generate a fresh random IV
    pub fn generate() -> Self {
        let mut bytes = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create an IV from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; IV_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidIvLength {
            expected: IV_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }

    /// Raw IV bytes
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for Iv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Iv({})", hex::encode(self.bytes))
    }
}

/// Length of the ciphertext produced for `plaintext_len` bytes of input
pub fn ciphertext_len(plaintext_len: usize) -> usize {
    plaintext_len + (BLOCK_SIZE - plaintext_len % BLOCK_SIZE)
}

/// Encrypt `plaintext` under `key` with a freshly generated IV
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> (Vec<u8>, Iv) {
    let iv = Iv::generate();
    (encrypt_with_iv(plaintext, key, &iv), iv)
}

/// Encrypt with a caller-chosen IV. Only used where the IV must be fixed,
/// such as known-answer tests.
pub(crate) fn encrypt_with_iv(plaintext: &[u8], key: &SymmetricKey, iv: &Iv) -> Vec<u8> {
    let schedule = KeySchedule::expand(key.as_bytes());
    let mut data = pad(plaintext);

    let mut previous: Block = *iv.as_bytes();
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        let mut block: Block = [0u8; BLOCK_SIZE];
        for (b, (p, prev)) in block.iter_mut().zip(chunk.iter().zip(previous.iter())) {
            *b = p ^ prev;
        }
        aes::encrypt_block(&mut block, &schedule);
        chunk.copy_from_slice(&block);
        previous = block;
    }
    data
}

/// Decrypt `ciphertext` produced by [`encrypt`]
///
/// # Errors
///
/// Fails when the ciphertext is empty or not block aligned, or when the
/// trailing pad count is larger than the decrypted buffer. Any other
/// corruption goes undetected.
pub fn decrypt(ciphertext: &[u8], key: &SymmetricKey, iv: &Iv) -> CryptoResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
    }

    let schedule = KeySchedule::expand(key.as_bytes());
    let mut plaintext = Vec::with_capacity(ciphertext.len());

    let mut previous: Block = *iv.as_bytes();
    for chunk in ciphertext.chunks_exact(BLOCK_SIZE) {
        let mut block: Block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        aes::decrypt_block(&mut block, &schedule);
        for (b, prev) in block.iter_mut().zip(previous.iter()) {
            *b ^= prev;
        }
        plaintext.extend_from_slice(&block);
        previous.copy_from_slice(chunk);
    }

    unpad(&mut plaintext)?;
    Ok(plaintext)
}

/// PKCS#7: always appends 1..=16 bytes, each holding the pad count.
fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Truncate by the trailing pad count. Pad bytes are not inspected.
fn unpad(data: &mut Vec<u8>) -> CryptoResult<()> {
    let pad = data.last().copied().unwrap_or(0) as usize;
    if pad > data.len() {
        return Err(CryptoError::InvalidPadding {
            pad,
            len: data.len(),
        });
    }
    data.truncate(data.len() - pad);
    Ok(())
}
