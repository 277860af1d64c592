//! syncpair - end-to-end harness for server/client file-sync binaries
//!
//! Runs the sync binary as a server/client pair through filesystem
//! scenarios and judges whether both trees converge.

use std::path::PathBuf;

use clap::Parser;
use syncpair::common::config::Config;
use syncpair::common::{logging, paths, Result};
use syncpair::{cli, commands::Commands};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "syncpair", about = "Scenario harness for file-sync binaries")]
#[command(version, long_about = None)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write a detailed log; without a path, logs go to the data dir
    #[arg(long, global = true, num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_file = cli.log_file.map(|path| {
        path.or_else(|| {
            paths::log_dir()
                .and_then(|dir| paths::ensure_dir(dir).ok())
                .map(|dir| dir.join("syncpair.log"))
        })
    });
    let headless = matches!(cli.command, Commands::Run { headless: true, .. });
    let guard = logging::init_cli(log_file.flatten().as_deref(), headless);

    let code = match run(cli.command, cli.config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the log file before exiting
    drop(guard);
    std::process::exit(code);
}

async fn run(command: Commands, config_path: Option<PathBuf>) -> Result<i32> {
    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping sessions");
            let _ = cancel_tx.send(true);
        }
    });

    cli::dispatch(command, config, cancel_rx).await
}
