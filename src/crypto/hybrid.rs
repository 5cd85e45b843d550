//! Hybrid encryption: AES-256-CBC payload, RSA-wrapped session key
//!
//! The session key travels as its base64 text, encrypted under the
//! recipient's public key. The same wrap is used for file payloads and for
//! chat session setup.

use super::error::{CryptoError, CryptoResult};
use super::rsa::{KeyPair, PublicKey};
use super::symmetric::{self, Iv, SymmetricKey};

/// Output of [`encrypt`]: each part travels in its own frame
#[derive(Debug, Clone)]
pub struct HybridPayload {
    /// CBC ciphertext of the payload
    pub ciphertext: Vec<u8>,
    /// Session key wrapped under the recipient's public key
    pub wrapped_key: Vec<u8>,
    /// IV used for the payload
    pub iv: Iv,
}

/// Wrap a session key for `recipient`
pub fn wrap_key(key: &SymmetricKey, recipient: &PublicKey) -> Vec<u8> {
    recipient.encrypt(key.to_text().as_bytes())
}

/// Recover a session key wrapped with [`wrap_key`]
pub fn unwrap_key(wrapped: &[u8], keys: &KeyPair) -> CryptoResult<SymmetricKey> {
    let text = String::from_utf8(keys.decrypt(wrapped))
        .map_err(|_| CryptoError::InvalidWrappedKey("not valid UTF-8".to_string()))?;
    SymmetricKey::from_text(&text)
}

/// Encrypt `data` for `recipient` under a fresh session key
pub fn encrypt(data: &[u8], recipient: &PublicKey) -> HybridPayload {
    let key = SymmetricKey::generate();
    let (ciphertext, iv) = symmetric::encrypt(data, &key);
    HybridPayload {
        ciphertext,
        wrapped_key: wrap_key(&key, recipient),
        iv,
    }
}

/// Decrypt a payload produced by [`encrypt`] with our own key pair
pub fn decrypt(
    ciphertext: &[u8],
    wrapped_key: &[u8],
    iv: &Iv,
    keys: &KeyPair,
) -> CryptoResult<Vec<u8>> {
    let key = unwrap_key(wrapped_key, keys)?;
    symmetric::decrypt(ciphertext, &key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa::DEFAULT_KEY_BITS;

    #[test]
    fn test_round_trip_chunk_boundaries() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        for size in [0usize, 1, 8191, 8192, 8193] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let payload = encrypt(&data, keys.public_key());
            assert_eq!(payload.ciphertext.len(), symmetric::ciphertext_len(size));

            let decrypted = decrypt(&payload.ciphertext, &payload.wrapped_key, &payload.iv, &keys)
                .unwrap();
            assert_eq!(decrypted, data, "size {}", size);
        }
    }

    #[test]
    fn test_wrapped_key_survives_round_trip() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let key = SymmetricKey::generate();
        let wrapped = wrap_key(&key, keys.public_key());
        assert_eq!(unwrap_key(&wrapped, &keys).unwrap(), key);
    }

    #[test]
    fn test_wrong_private_key_fails() {
        let alice = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let mallory = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let payload = encrypt(b"for alice only", alice.public_key());
        let result = decrypt(&payload.ciphertext, &payload.wrapped_key, &payload.iv, &mallory);
        assert!(result.is_err());
    }

    #[test]
    fn test_fresh_session_key_per_payload() {
        let keys = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let a = encrypt(b"same", keys.public_key());
        let b = encrypt(b"same", keys.public_key());
        assert_ne!(a.wrapped_key, b.wrapped_key);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
