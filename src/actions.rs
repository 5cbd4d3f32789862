use serde::{Deserialize, Serialize};

use crate::{
    session::Registration,
    try_on::{ClothType, ShowType, TryOnParams},
    user::{Identity, UserId},
};

/// Credentials for logging in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Login {
    /// Login name.
    pub username: String,

    /// Plaintext password.
    pub password: String,
}

/// Ask for a try-on image.
///
/// Images are referred to by name:
/// the model image among uploads, the garment within the wardrobe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TryOn {
    /// An uploaded model photo.
    pub model_image: Option<String>,

    /// A garment in the wardrobe.
    pub garment_image: Option<String>,

    /// Generation parameters. Omitted ones take their defaults.
    #[serde(flatten)]
    pub params: TryOnParams,
}

/// A plain text confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Text for showing to users.
    pub message: String,
}

impl Message {
    /// Wrap some text.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whoami {
    /// The logged in user.
    pub identity: Identity,

    /// The greeting to show.
    pub welcome: String,
}

impl From<Identity> for Whoami {
    fn from(identity: Identity) -> Self {
        Self {
            welcome: identity.welcome(),
            identity,
        }
    }
}

/// Images available to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Garments {
    /// File names, sorted.
    pub garments: Vec<String>,
}

impl Registration {
    /// An example of registering a new account.
    pub fn example() -> Self {
        Self {
            name: "Alice".into(),
            username: "alice1".into(),
            password: "pw123".into(),
            confirm_password: "pw123".into(),
        }
    }
}

impl Login {
    /// An example of logging in.
    pub fn example() -> Self {
        Self {
            username: "alice1".into(),
            password: "pw123".into(),
        }
    }
}

impl TryOn {
    /// An example of asking for a try-on.
    pub fn example() -> Self {
        Self {
            model_image: Some("me.jpg".into()),
            garment_image: Some("red-dress.png".into()),
            params: TryOnParams {
                cloth_type: ClothType::Overall,
                show_type: ShowType::InputResult,
                ..Default::default()
            },
        }
    }
}

impl Whoami {
    /// An example of the reply to logging in.
    pub fn example() -> Self {
        Identity {
            id: UserId(1),
            name: "Alice".into(),
            username: "alice1".into(),
        }
        .into()
    }
}
