//! Persistent records of registered users, and checking login attempts against them.
//!
//! Usernames are compared exactly, so `alice` and `Alice` are different users.

use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::Error,
    user::{Identity, UserId},
};

/// In-memory backend.
pub mod memory;

/// Password hashing.
pub mod password;

/// SQLite backend.
pub mod sqlite;

pub use memory::MemoryCredentials;
pub use password::PasswordHash;
pub use sqlite::SqliteCredentials;

/// One registered identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Assigned on creation, never changes.
    pub id: UserId,

    /// Display name. Not unique.
    pub name: String,

    /// Unique login name.
    pub username: String,

    /// Salted hash of the password.
    pub password: PasswordHash,
}

impl UserRecord {
    /// The part of the record a session keeps.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            name: self.name.clone(),
            username: self.username.clone(),
        }
    }
}

/// Storage and lookup of [`UserRecord`]s.
///
/// Operations are blocking.
/// Call them from a blocking context when on an async runtime.
pub trait CredentialStore: Send + Sync {
    /// Make sure the backing storage exists.
    /// Safe to call any number of times.
    fn initialize(&self) -> Result<(), Error>;

    /// Store a new user.
    ///
    /// Fails with [`Error::DuplicateUsername`] if the username is taken.
    /// Checking and inserting happen as one atomic unit.
    fn register(&self, name: &str, username: &str, password: &str) -> Result<(), Error>;

    /// Find the user with this username, if the password is right.
    ///
    /// Unknown usernames and wrong passwords both give `Ok(None)`.
    /// Errors are reserved for storage failures.
    fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserRecord>, Error>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn initialize(&self) -> Result<(), Error> {
        (**self).initialize()
    }

    fn register(&self, name: &str, username: &str, password: &str) -> Result<(), Error> {
        (**self).register(name, username, password)
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserRecord>, Error> {
        (**self).authenticate(username, password)
    }
}

/// Where users are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Storage {
    /// Lost when the process exits.
    Memory,

    /// A SQLite database file.
    Sqlite(PathBuf),
}

impl Default for Storage {
    fn default() -> Self {
        Self::Sqlite("users.db".into())
    }
}

/// Open the configured backend and initialize it.
pub fn open(storage: &Storage, cost: u32) -> Result<Arc<dyn CredentialStore>, Error> {
    let store: Arc<dyn CredentialStore> = match storage {
        Storage::Memory => Arc::new(MemoryCredentials::new(cost)),
        Storage::Sqlite(path) => Arc::new(SqliteCredentials::open(path, cost)?),
    };

    store.initialize()?;
    info!(?storage, "Credential store ready");

    Ok(store)
}
