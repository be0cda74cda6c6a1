// kmirror/src/main.rs
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use kmirror_common::config::Config;
use kmirror_common::error::Result;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod builder;
mod cli;
mod manifest;

use cli::CliArgs;

const LOG_ENV_VAR: &str = "KMIRROR_LOG";
const LOG_FILE_NAME: &str = "kmirror.log";

// No `process::exit` below: `_log_guard` has to drop to flush the log file.
#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();
    let _log_guard = init_logging(cli_args.verbose, cli_args.log_dir.as_deref());

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: Could not load configuration: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli_args, config).await {
        Ok(code) => {
            debug!("Command completed.");
            code
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli_args: CliArgs, config: Config) -> Result<ExitCode> {
    cli_args.command.run(config).await
}

/// Logs go to stderr, and additionally to a daily rotated file when a log
/// directory is given. The returned guard flushes the file writer on drop.
fn init_logging(verbose: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let Some(log_dir) = log_dir else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .try_init();
        return None;
    };

    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {}",
            "Error:".red().bold(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .try_init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr.and(non_blocking_appender))
        .with_ansi(false)
        .try_init();
    debug!(
        "Writing logs to: {}/{}",
        log_dir.display(),
        LOG_FILE_NAME
    );
    Some(guard)
}
