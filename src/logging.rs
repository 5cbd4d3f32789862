use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) {
    let mut message = String::from("Logging with:");

    // stdout
    message += " stdout";

    // RUST_LOG wins over the given level when set.
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from(stdout_level).into()));

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(stdout_filter);

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let maybe_file_layer = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, "vton.log");

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        Some(file_layer)
    } else {
        None
    };

    registry.with(maybe_file_layer).init();

    debug!(message);
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub async fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        do_init(stdout_level, file_logging);

        *initialized = true;
    }

    info!("Logging initialized");
}
