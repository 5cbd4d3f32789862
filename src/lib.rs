#![deny(missing_docs)]

//! Vton puts a credential gate in front of a virtual garment try-on service.
//!
//! Users register with a name, a username and a password.
//! Once logged in, a user may upload model photos,
//! pick or upload garments in a shared wardrobe,
//! and ask a remote image-synthesis service for a picture of the model wearing the garment.
//!
//! The server speaks JSON over HTTP.
//! The session is carried in a cookie.

/// JSON requests and replies.
pub mod actions;

/// Typed HTTP client for a running server.
pub mod client;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Storing users and checking passwords.
pub mod credentials;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// Code relating to setting up the web server.
pub mod server;

/// Logged in or not, and the rules for moving between the two.
pub mod session;

/// Calling out to the image-synthesis service.
pub mod try_on;

/// Who a user is.
pub mod user;

/// Image files on disk.
pub mod wardrobe;
