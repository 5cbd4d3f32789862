use std::{
    collections::HashMap,
    fmt::Display,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{credentials::CredentialStore, error::Error, user::Identity};

/// Shown after a successful registration.
pub const REGISTERED: &str = "Account created successfully! You are now registered.";

/// What a user fills in to create an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Display name.
    pub name: String,

    /// Wanted login name.
    pub username: String,

    /// Wanted password.
    pub password: String,

    /// The password typed a second time.
    pub confirm_password: String,
}

/// Whether someone is logged in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    /// Nobody is logged in.
    #[default]
    Anonymous,

    /// Logged in as this identity.
    Authenticated(Identity),
}

impl Session {
    /// Become logged in as the given identity.
    pub fn login(&mut self, identity: Identity) {
        *self = Session::Authenticated(identity);
    }

    /// Become anonymous. Returns who was logged in, if anyone.
    pub fn logout(&mut self) -> Option<Identity> {
        match std::mem::take(self) {
            Session::Anonymous => None,
            Session::Authenticated(identity) => Some(identity),
        }
    }

    /// Who is logged in.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Session::Anonymous => None,
            Session::Authenticated(identity) => Some(identity),
        }
    }

    /// Who is logged in, or [`Error::NotLoggedIn`].
    pub fn require(&self) -> Result<&Identity, Error> {
        self.identity().ok_or(Error::NotLoggedIn)
    }
}

fn check_username(username: &str) -> Result<(), Error> {
    if username.trim().is_empty() {
        return Err(Error::BadUsage("The username can't be blank".into()));
    }

    if username.chars().any(char::is_control) {
        return Err(Error::BadUsage(
            "The username can't contain control characters".into(),
        ));
    }

    Ok(())
}

/// Turns registration and login attempts into session changes.
#[derive(Clone)]
pub struct SessionGate {
    store: Arc<dyn CredentialStore>,
}

impl SessionGate {
    /// A gate in front of the given store.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Create an account.
    ///
    /// The store is not touched unless the password was confirmed.
    /// Does not log anyone in.
    pub fn register(&self, registration: &Registration) -> Result<(), Error> {
        check_username(&registration.username)?;

        if registration.password != registration.confirm_password {
            return Err(Error::PasswordMismatch);
        }

        self.store.register(
            &registration.name,
            &registration.username,
            &registration.password,
        )?;
        info!(username = %registration.username, "Account created");

        Ok(())
    }

    /// Log in.
    ///
    /// On failure the session is left as it was.
    pub fn login<'s>(
        &self,
        session: &'s mut Session,
        username: &str,
        password: &str,
    ) -> Result<&'s Identity, Error> {
        match self.store.authenticate(username, password)? {
            Some(record) => {
                let identity = record.identity();
                info!(%identity, "Logged in");
                session.login(identity);

                session.require()
            }
            None => {
                debug!(username, "Rejected login");
                Err(Error::InvalidCredentials)
            }
        }
    }

    /// Log out. Storage is not involved.
    pub fn logout(&self, session: &mut Session) {
        if let Some(identity) = session.logout() {
            info!(%identity, "Logged out");
        }
    }
}

/// An opaque handle to a server side [`Session`].
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct SessionToken(Uuid);

impl SessionToken {
    /// The name of the cookie carrying the token.
    pub const COOKIE: &'static str = "vton_session";

    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a token as found in a cookie.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// A `Set-Cookie` value handing this token to a browser.
    pub fn set_cookie(&self) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            Self::COOKIE,
            self.0
        )
    }

    /// A `Set-Cookie` value making a browser forget its token.
    pub fn clear_cookie() -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0", Self::COOKIE)
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Entry {
    session: Session,
    last_seen: Instant,
}

impl Entry {
    fn new(session: Session) -> Self {
        Self {
            session,
            last_seen: Instant::now(),
        }
    }
}

/// The sessions of everyone using the server, by token.
///
/// Sessions unused for longer than the idle timeout are forgotten.
#[derive(Debug, Clone)]
pub struct Sessions {
    idle_timeout: Duration,
    sessions: Arc<Mutex<HashMap<SessionToken, Entry>>>,
}

impl Sessions {
    /// No sessions yet. Sessions idle for longer than `idle_timeout` expire.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            sessions: Arc::default(),
        }
    }

    fn prune(&self, sessions: &mut HashMap<SessionToken, Entry>) {
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_seen.elapsed() < self.idle_timeout);

        let expired = before - sessions.len();
        if expired > 0 {
            debug!(expired, "Forgot idle sessions");
        }
    }

    /// Keep an authenticated session, returning the token that refers to it.
    pub fn insert(&self, session: Session) -> SessionToken {
        let token = SessionToken::new();

        let mut sessions = self.sessions.lock();
        self.prune(&mut sessions);
        sessions.insert(token, Entry::new(session));

        token
    }

    /// The session for a token.
    /// Unknown, expired or missing tokens are anonymous.
    pub fn get(&self, token: Option<SessionToken>) -> Session {
        let mut sessions = self.sessions.lock();
        self.prune(&mut sessions);

        let entry = match token {
            Some(token) => sessions.get_mut(&token),
            None => None,
        };

        match entry {
            Some(entry) => {
                entry.last_seen = Instant::now();
                entry.session.clone()
            }
            None => Session::default(),
        }
    }

    /// Run a session transition in place.
    /// Sessions left anonymous are dropped.
    pub fn update<R>(&self, token: SessionToken, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.lock();
        self.prune(&mut sessions);

        let mut session = sessions
            .remove(&token)
            .map(|entry| entry.session)
            .unwrap_or_default();

        let result = f(&mut session);

        if session.identity().is_some() {
            sessions.insert(token, Entry::new(session));
        }

        result
    }

    /// How many sessions are kept, expired ones included until the next prune.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True if no sessions are kept.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
