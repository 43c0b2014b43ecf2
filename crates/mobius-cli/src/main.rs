//! Mobius CLI - a terminal front-end for the Mobius Context Platform API.
//!
//! Signs in, keeps the session tokens in the OS keychain (or an encrypted
//! file), and issues authenticated requests with transparent token refresh.

mod commands;
mod config;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use mobius_core::{ApiClient, ClientConfig};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;
use config::CliConfig;

/// Log file name in the cache directory
const LOG_FILE: &str = "mobius.log";

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the file writer on drop; keep it alive for the whole run.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=mobius_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config::log_dir() {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
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
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(usage) => {
            eprintln!("{usage}");
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let client_config = ClientConfig::from_env().context("Invalid API configuration")?;
    info!(base_url = %client_config.base_url, timeout_ms = client_config.timeout.as_millis() as u64, "Mobius CLI starting");

    let client = ApiClient::builder(client_config)
        .token_store(config::open_token_store()?)
        .login_redirect(Arc::new(|| {
            eprintln!("Session expired. Run `mobius login` to sign in again.");
        }))
        .build()
        .context("Failed to create HTTP client")?;

    let mut cli_config = CliConfig::load().unwrap_or_default();
    commands::run(command, &client, &mut cli_config).await
}
