use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::{CredentialStore, PasswordHash, UserRecord};
use crate::{error::Error, user::UserId};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    by_username: HashMap<String, UserRecord>,
}

/// Keeps users in a map.
/// Registrations are lost when dropped.
#[derive(Debug)]
pub struct MemoryCredentials {
    cost: u32,
    inner: Mutex<Inner>,
}

impl MemoryCredentials {
    /// An empty store hashing passwords with the given bcrypt cost.
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// How many users are registered.
    pub fn len(&self) -> usize {
        self.inner.lock().by_username.len()
    }

    /// True if nobody registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentials {
    fn initialize(&self) -> Result<(), Error> {
        Ok(())
    }

    fn register(&self, name: &str, username: &str, password: &str) -> Result<(), Error> {
        // Hash outside the lock, it is slow on purpose.
        let password = PasswordHash::new(password, self.cost)?;

        let mut inner = self.inner.lock();
        if inner.by_username.contains_key(username) {
            return Err(Error::DuplicateUsername);
        }

        let id = UserId(inner.next_id);
        inner.next_id += 1;

        inner.by_username.insert(
            username.to_owned(),
            UserRecord {
                id,
                name: name.to_owned(),
                username: username.to_owned(),
                password,
            },
        );
        debug!(%id, username, "Registered");

        Ok(())
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserRecord>, Error> {
        let record = self.inner.lock().by_username.get(username).cloned();

        Ok(record.filter(|record| record.password.verify(password)))
    }
}
