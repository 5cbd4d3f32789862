use std::{path::Path, time::Duration};

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use super::{CredentialStore, PasswordHash, UserRecord};
use crate::{error::Error, user::UserId};

/// How long to wait for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        username TEXT UNIQUE NOT NULL,
        password TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
"#;

/// Users in a SQLite database.
///
/// Several processes may share the same file.
pub struct SqliteCredentials {
    cost: u32,
    conn: Mutex<Connection>,
}

impl SqliteCredentials {
    /// Open or create a database file.
    /// Call [`CredentialStore::initialize`] before use.
    pub fn open<P: AsRef<Path>>(path: P, cost: u32) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!(?path, "Opening credential database");

        let conn = Connection::open(path).map_err(Error::storage)?;
        Self::with_connection(conn, cost)
    }

    /// A private in-memory database, for tests.
    pub fn in_memory(cost: u32) -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(Error::storage)?;
        Self::with_connection(conn, cost)
    }

    fn with_connection(conn: Connection, cost: u32) -> Result<Self, Error> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(Error::storage)?;

        Ok(Self {
            cost,
            conn: Mutex::new(conn),
        })
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

impl CredentialStore for SqliteCredentials {
    fn initialize(&self) -> Result<(), Error> {
        self.conn
            .lock()
            .execute_batch(SCHEMA)
            .map_err(Error::storage)?;
        info!("Credential schema in place");

        Ok(())
    }

    fn register(&self, name: &str, username: &str, password: &str) -> Result<(), Error> {
        let password = PasswordHash::new(password, self.cost)?;
        let created_at = chrono::Utc::now().to_rfc3339();

        let mut conn = self.conn.lock();

        // IMMEDIATE takes the write lock up front, so other processes
        // can't slip an insert in between our check and our insert.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Error::storage)?;

        let taken = tx
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1",
                params![username],
                |_| Ok(()),
            )
            .optional()
            .map_err(Error::storage)?
            .is_some();

        if taken {
            return Err(Error::DuplicateUsername);
        }

        match tx.execute(
            "INSERT INTO users (name, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, username, password.as_str(), created_at],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(Error::DuplicateUsername),
            Err(e) => return Err(Error::storage(e)),
        }

        let id = UserId(tx.last_insert_rowid());
        tx.commit().map_err(Error::storage)?;
        debug!(%id, username, "Registered");

        Ok(())
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<Option<UserRecord>, Error> {
        let record = self
            .conn
            .lock()
            .query_row(
                "SELECT id, name, username, password FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserRecord {
                        id: UserId(row.get(0)?),
                        name: row.get(1)?,
                        username: row.get(2)?,
                        password: PasswordHash::from_stored(row.get(3)?),
                    })
                },
            )
            .optional()
            .map_err(Error::storage)?;

        Ok(record.filter(|record| record.password.verify(password)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::credentials::{conformance, password::MIN_COST};

    fn store() -> SqliteCredentials {
        let store = SqliteCredentials::in_memory(MIN_COST).unwrap();
        store.initialize().unwrap();
        store
    }

    #[test]
    fn register_then_authenticate() {
        conformance::register_then_authenticate(&store());
    }

    #[test]
    fn duplicate_username() {
        conformance::duplicate_username(&store());
    }

    #[test]
    fn wrong_password() {
        conformance::wrong_password(&store());
    }

    #[test]
    fn long_passwords_compared_in_full() {
        conformance::long_passwords_compared_in_full(&store());
    }

    #[test]
    fn unknown_username() {
        conformance::unknown_username(&store());
    }

    #[test]
    fn case_sensitive() {
        conformance::case_sensitive(&store());
    }

    #[test]
    fn ids_are_unique() {
        conformance::ids_are_unique(&store());
    }

    #[test]
    fn initialize_is_idempotent() {
        conformance::initialize_is_idempotent(&store());
    }

    #[test]
    fn password_is_not_stored_in_plaintext() {
        let store = store();
        store.register("Alice", "alice1", "pw123").unwrap();

        let stored: String = store
            .conn
            .lock()
            .query_row(
                "SELECT password FROM users WHERE username = 'alice1'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_ne!(stored, "pw123");
        assert!(stored.starts_with("$2"));
    }

    #[test]
    fn survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");

        {
            let store = SqliteCredentials::open(&path, MIN_COST).unwrap();
            store.initialize().unwrap();
            store.register("Alice", "alice1", "pw123").unwrap();
        }

        let store = SqliteCredentials::open(&path, MIN_COST).unwrap();
        store.initialize().unwrap();

        let record = store.authenticate("alice1", "pw123").unwrap().unwrap();
        assert_eq!(record.name, "Alice");
        assert_eq!(
            store.register("Alice again", "alice1", "other"),
            Err(Error::DuplicateUsername)
        );
    }

    #[test]
    fn racing_connections_admit_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");

        SqliteCredentials::open(&path, MIN_COST)
            .unwrap()
            .initialize()
            .unwrap();

        // Separate connections stand in for separate processes.
        let stores = (0..4)
            .map(|_| Arc::new(SqliteCredentials::open(&path, MIN_COST).unwrap()))
            .collect::<Vec<_>>();

        let handles = stores
            .iter()
            .enumerate()
            .map(|(i, store)| {
                let store = Arc::clone(store);
                std::thread::spawn(move || store.register(&format!("Racer {i}"), "racer", "pw"))
            })
            .collect::<Vec<_>>();

        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| r == &Err(Error::DuplicateUsername)));
    }

    #[test]
    fn unreachable_database_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("users.db");

        let result =
            SqliteCredentials::open(&path, MIN_COST).and_then(|store| store.initialize());

        assert_eq!(result, Err(Error::StorageUnavailable));
    }

    #[test]
    fn storage_lost_after_opening_is_storage_unavailable() {
        let store = store();
        store.register("Alice", "alice1", "pw123").unwrap();

        store
            .conn
            .lock()
            .execute_batch("DROP TABLE users")
            .unwrap();

        assert_eq!(
            store.authenticate("alice1", "pw123"),
            Err(Error::StorageUnavailable)
        );
        assert_eq!(
            store.register("Bob", "bob", "pw"),
            Err(Error::StorageUnavailable)
        );
    }
}
