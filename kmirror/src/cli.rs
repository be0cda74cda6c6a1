// kmirror/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use kmirror_common::error::Result;
use kmirror_common::Config;

pub mod is_published;
pub mod list_packages;
pub mod mirror;

use crate::cli::is_published::IsPublishedArgs;
use crate::cli::list_packages::ListPackagesArgs;
use crate::cli::mirror::MirrorArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "kmirror", bin_name = "kmirror")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and publish every kernel package × driver version combination
    Mirror(MirrorArgs),
    /// Check whether an artifact is already published (exit status 1 if not)
    IsPublished(IsPublishedArgs),
    /// List the kernel packages of a manifest
    ListPackages(ListPackagesArgs),
}

impl Command {
    pub async fn run(&self, config: Config) -> Result<ExitCode> {
        match self {
            Self::Mirror(command) => command.run(config).await.map(|()| ExitCode::SUCCESS),
            Self::IsPublished(command) => command.run(config).await,
            Self::ListPackages(command) => command.run().map(|()| ExitCode::SUCCESS),
        }
    }
}
