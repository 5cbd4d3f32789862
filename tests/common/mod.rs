#![allow(dead_code)]

use color_eyre::Result;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tracing::{info, Level};
use vton::{
    client::ClientHandle,
    config::Config,
    credentials::{password::MIN_COST, Storage},
    session::Registration,
    try_on::TryOnBackend,
};

/// A running server, and the scratch directory it keeps its files in.
/// The directory is removed when this is dropped.
pub struct TestServer {
    pub port: u16,
    pub dir: TempDir,
}

impl TestServer {
    pub fn client(&self) -> Result<ClientHandle> {
        Ok(ClientHandle::new("127.0.0.1", self.port)?)
    }
}

/// A config which keeps everything in a scratch directory and never leaves the machine.
pub fn test_config(dir: &TempDir) -> Config {
    Config {
        storage: Storage::Memory,
        password_cost: MIN_COST,
        wardrobe_dir: dir.path().join("wardrobe"),
        uploads_dir: dir.path().join("uploads"),
        try_on: TryOnBackend::Mock,
        session_idle_secs: 60 * 60,
    }
}

pub async fn start_server_with_config(config: Config, dir: TempDir) -> TestServer {
    vton::logging::init(Level::DEBUG, None).await;

    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move { vton::server::run_any_port(config, port_tx).await });
    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    info!("Server on port {port}");

    TestServer { port, dir }
}

pub async fn start_server() -> Result<TestServer> {
    let dir = tempfile::tempdir()?;
    let config = test_config(&dir);

    Ok(start_server_with_config(config, dir).await)
}

pub fn registration(name: &str, username: &str, password: &str) -> Registration {
    Registration {
        name: name.into(),
        username: username.into(),
        password: password.into(),
        confirm_password: password.into(),
    }
}

/// A server with a registered and logged in user.
pub async fn start_server_and_login() -> Result<(TestServer, ClientHandle)> {
    let server = start_server().await?;
    let client = server.client()?;

    client
        .register(&registration("Alice", "alice1", "pw123"))
        .await?;
    client.login("alice1", "pw123").await?;

    Ok((server, client))
}
