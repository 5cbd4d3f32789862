//! Salted one-way password hashes.

use std::fmt::Debug;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// The cheapest cost bcrypt accepts. Useful for tests.
pub const MIN_COST: u32 = 4;

/// The cost used when nothing else is configured.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// bcrypt ignores input past 72 bytes.
/// Hashing the SHA-256 digest instead makes every byte of the password count.
fn digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());

    BASE64.encode(hasher.finalize())
}

/// A bcrypt hash of a password.
/// The salt is embedded in the hash string.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash a plaintext password with a fresh random salt.
    pub fn new(password: &str, cost: u32) -> Result<Self, Error> {
        bcrypt::hash(digest(password), cost)
            .map(Self)
            .map_err(Error::storage)
    }

    /// Wrap a hash string loaded from storage.
    pub fn from_stored(hash: String) -> Self {
        Self(hash)
    }

    /// The hash string, for storing.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check a plaintext password against this hash.
    ///
    /// A malformed stored hash never verifies.
    pub fn verify(&self, password: &str) -> bool {
        bcrypt::verify(digest(password), &self.0).unwrap_or(false)
    }
}

// Never print the hash.
impl Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}
