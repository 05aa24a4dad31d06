//! Gatehouse CLI - log in to the residence backend and exercise the session.
//!
//! Handy for checking a backend deployment without the mobile app: it uses
//! the same session store, refresh logic and request wrapper.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;
use gatehouse_core::Config;

/// Log file name inside the cache directory
const LOG_FILE: &str = "gatehouse.log";

/// Initialize the tracing subscriber for logging.
///
/// Warnings go to stderr; everything the filter allows also goes to a log
/// file in the cache directory when one is available.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, commands::USAGE);
            std::process::exit(2);
        }
    };
    if matches!(command, Command::Help) {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let mut config = Config::load()?;
    let _guard = init_tracing(config.cache_dir().ok().as_deref());
    info!(api = %config.api_base_url, storage = ?config.storage, "Gatehouse CLI starting");

    let session = config.build_session()?;
    commands::run(command, &session, &mut config).await
}
