use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors thay may occur in this library.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// Registration picked a username which is already taken.
    #[error("Username already exists")]
    DuplicateUsername,

    /// Registration password and its confirmation differ.
    #[error("Passwords do not match")]
    PasswordMismatch,

    /// Login failed.
    /// Does not tell whether the username or the password was wrong.
    #[error("Username/password is incorrect")]
    InvalidCredentials,

    /// The request needs a logged in session.
    #[error("Please log in first")]
    NotLoggedIn,

    /// The credential store could not be reached.
    /// Details are logged, not sent to users.
    #[error("The credential store is unavailable, please try again later")]
    StorageUnavailable,

    /// The user did something which is not valid.
    /// For example, a blank username or an out of range seed.
    #[error("The request did not conform to valid usage. Problem: `{0}`")]
    BadUsage(String),

    /// The request body could not be understood.
    #[error("The request `{request}` could not be deserialized. Problem: {problem}")]
    BadJson {
        /// The problematic request.
        request: String,

        /// The deserialization issue.
        problem: String,
    },

    /// An image name which can't be stored or looked up.
    #[error("`{0}` is not a valid image name, use a plain .png, .jpg or .jpeg file name")]
    BadImageName(String),

    /// No image by that name.
    #[error("The image `{0}` does not exist")]
    NoSuchImage(String),

    /// A try-on needs both a model image and a garment image.
    #[error("Please select both model and garment images.")]
    MissingImages,

    /// An upload was bigger than the server accepts.
    #[error("Uploads can be at most {limit} bytes")]
    UploadTooLarge {
        /// The largest accepted upload, in bytes.
        limit: u64,
    },

    /// Reading or writing an image file failed.
    #[error("Image storage problem: {0}")]
    ImageStorage(String),

    /// The remote image-synthesis service failed.
    /// The message is passed on as-is.
    #[error("Failed to connect to the server: {0}")]
    TryOn(String),

    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// Running or reaching the HTTP server failed.
    #[error("Server problem: {0}")]
    Serve(String),
}

impl Error {
    /// If this is a bad config error, get the problem description.
    pub fn try_into_bad_config(self) -> Option<String> {
        match self {
            Error::BadConfig(problem) => Some(problem),
            _ => None,
        }
    }

    /// Collapse a storage driver error.
    /// The driver error is logged since users only see a generic message.
    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        warn!(%e, "Credential store failure");
        Error::StorageUnavailable
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::DuplicateUsername => StatusCode::CONFLICT,
            Error::PasswordMismatch
            | Error::BadUsage(_)
            | Error::BadJson { .. }
            | Error::BadImageName(_)
            | Error::MissingImages => StatusCode::BAD_REQUEST,
            Error::InvalidCredentials | Error::NotLoggedIn => StatusCode::UNAUTHORIZED,
            Error::NoSuchImage(_) => StatusCode::NOT_FOUND,
            Error::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TryOn(_) => StatusCode::BAD_GATEWAY,
            Error::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::ImageStorage(_) | Error::BadConfig(_) | Error::Serve(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// The JSON body of an error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// What went wrong.
    pub error: Error,

    /// Human readable text for showing to users.
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            message: self.to_string(),
            error: self,
        };

        (status, Json(body)).into_response()
    }
}
