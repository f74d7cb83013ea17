//! keg - Homebrew package state cache and formula catalog mirror
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use keg::cli::commands::{self, AppContext};
use keg::cli::{Cli, Commands};
use keg::config::ConfigManager;
use keg::error::KegResult;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KegResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    debug!("Using config {}", manager.path().display());

    let state_dir = ConfigManager::state_dir(&config, cli.state_dir.as_deref());
    ConfigManager::ensure_state_dirs(&state_dir).await?;
    debug!("Using state directory {}", state_dir.display());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let ctx = AppContext {
        config,
        state_dir,
        cancel,
    };

    match cli.command {
        Commands::Catalog(args) => commands::catalog(args, &ctx).await,
        Commands::State(args) => commands::state(args, &ctx).await,
        Commands::Config(args) => commands::config(args, &manager, &ctx).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `log_format = "json"` switches formatter
fn init_logging(verbose: u8, log_format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("keg=warn"),
        1 => EnvFilter::new("keg=info"),
        _ => EnvFilter::new("keg=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
