//! Salted password hashing for credential records
//!
//! Storage of the records is left to the embedding application.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::Sha256;

const SALT_LEN: usize = 16;

/// Fresh random salt, base64 encoded
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    BASE64.encode(salt)
}

/// Lowercase hex SHA-256 of `password` followed by `salt`
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut input = Vec::with_capacity(password.len() + salt.len());
    input.extend_from_slice(password.as_bytes());
    input.extend_from_slice(salt.as_bytes());
    Sha256::hex_digest(&input)
}

/// Stored form of a user's password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password_hash: String,
    pub salt: String,
}

impl Credential {
    /// Hash `password` under a fresh salt
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        let salt = generate_salt();
        Self {
            username: username.into(),
            password_hash: hash_password(password, &salt),
            salt,
        }
    }

    /// Check a login attempt against this record
    pub fn verify(&self, password: &str) -> bool {
        hash_password(password, &self.salt) == self.password_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_concatenation() {
        assert_eq!(
            hash_password("ab", "c"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_salt_shape() {
        let a = generate_salt();
        let b = generate_salt();
        assert_eq!(a.len(), 24);
        assert_ne!(a, b);
    }

    #[test]
    fn test_credential_verify() {
        let cred = Credential::new("alice", "hunter2");
        assert_eq!(cred.password_hash.len(), 64);
        assert!(cred.verify("hunter2"));
        assert!(!cred.verify("hunter3"));
        assert!(!cred.verify(""));
    }

    #[test]
    fn test_same_password_different_salt() {
        let a = Credential::new("alice", "secret");
        let b = Credential::new("bob", "secret");
        assert_ne!(a.password_hash, b.password_hash);
    }
}
