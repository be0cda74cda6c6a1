// kmirror/src/cli/is_published.rs
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use kmirror_common::config::Config;
use kmirror_common::error::{KmError, Result};
use kmirror_core::repository::{Publisher, ReleaseCache};
use kmirror_net::GithubReleases;

#[derive(Debug, Args)]
pub struct IsPublishedArgs {
    /// Driver version the artifact was built against
    #[arg(value_name = "VERSION")]
    driver_version: String,
    /// File name of the artifact, e.g. falco_ubuntu_4.15.0-147-generic_151.o
    artifact_name: String,
}

impl IsPublishedArgs {
    /// Exits with status 1 when the artifact is missing.
    pub async fn run(&self, config: Config) -> Result<ExitCode> {
        let version = self.driver_version.clone();
        let artifact_name = self.artifact_name.clone();
        let published = tokio::task::spawn_blocking(move || -> Result<bool> {
            let tag_prefix_len = config.tag_prefix_len;
            let store = GithubReleases::new(config)?;
            let cache = ReleaseCache::new(Arc::new(store));
            Publisher::new(Arc::new(cache))
                .with_tag_prefix_len(tag_prefix_len)
                .is_already_published(&version, &artifact_name)
        })
        .await
        .map_err(|e| KmError::Generic(format!("Lookup aborted: {e}")))??;

        if published {
            println!(
                "{} {} is published for {}",
                "✓".green().bold(),
                self.artifact_name.bold(),
                self.driver_version
            );
        } else {
            println!(
                "{} {} is not published for {}",
                "✗".red().bold(),
                self.artifact_name.bold(),
                self.driver_version
            );
        }
        Ok(exit_code(published))
    }
}

fn exit_code(published: bool) -> ExitCode {
    if published {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
