use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    actions::{Login, TryOn, Whoami},
    config::Config,
    error::Error,
    session::Registration,
};

/// The command line interface for vton.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::server::DEFAULT_PORT)]
    pub port: u16,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request registering an account.
    Register,

    /// Show an example JSON request logging in.
    Login,

    /// Show an example JSON response to logging in.
    LoggedIn,

    /// Show an example JSON request asking for a try-on.
    TryOn,

    /// Show an example JSON response to a failed request.
    Error,
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Could not serialize: {e}"))
}

/// What an example looks like.
pub fn example(example: &Examples) -> String {
    match example {
        Examples::Config => Config::example().serialize_pretty(),
        Examples::Register => pretty(&Registration::example()),
        Examples::Login => pretty(&Login::example()),
        Examples::LoggedIn => pretty(&Whoami::example()),
        Examples::TryOn => pretty(&TryOn::example()),
        Examples::Error => {
            let error = Error::DuplicateUsername;
            pretty(&crate::error::ErrorBody {
                message: error.to_string(),
                error,
            })
        }
    }
}

/// Run a subcommand.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(e) => println!("{}", example(&e)),
    }
}
