use clap::Parser;
use color_eyre::Result;
use tracing::{debug, error, info, Level};
use vton::{cli, config::Config, logging, server};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::hangup())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    std::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    logging::init(level, cli.log_dir.map(|dir| (level, dir))).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
        result = server::run_on_port(config, cli.port) => {
            error!(?result, "Server returned");
            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    Ok(())
}
