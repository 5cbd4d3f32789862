use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identifies a registered user.
/// Assigned by the credential store, never reused.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parts of a registered user an authenticated session holds on to.
///
/// Only used as a display label and as proof of being logged in.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The user's id.
    pub id: UserId,

    /// Display name.
    pub name: String,

    /// Login name.
    pub username: String,
}

impl Identity {
    /// The greeting shown to a logged in user.
    pub fn welcome(&self) -> String {
        format!("Welcome {}", self.name)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.username, self.id)
    }
}
