// kmirror/src/cli/mirror.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use colored::Colorize;
use kmirror_common::config::Config;
use kmirror_common::error::{KmError, Result};
use kmirror_common::model::DriverTarget;
use kmirror_common::pipeline::RunReport;
use kmirror_common::store::ReleaseStore;
use kmirror_core::mirror::MirrorContext;
use kmirror_core::pipeline::engine::default_worker_count;
use kmirror_core::pipeline::{Engine, EngineOptions};
use kmirror_core::queue::{
    QueueOptions, ShutdownSignal, DEFAULT_BUFFER, DEFAULT_QUIET_THRESHOLD,
};
use kmirror_core::repository::{MemoryReleaseStore, Publisher, ReleaseCache};
use kmirror_net::GithubReleases;
use tracing::{info, instrument, warn};

use crate::builder::CommandBuilder;
use crate::manifest::ManifestOperatingSystem;

#[derive(Debug, Args)]
pub struct MirrorArgs {
    /// TOML manifest describing the operating system and its kernel packages
    #[arg(value_name = "MANIFEST")]
    manifest: PathBuf,

    /// Driver versions to build against, as VERSION or LABEL=VERSION
    #[arg(long = "driver", value_name = "[LABEL=]VERSION", required = true, value_parser = parse_driver)]
    drivers: Vec<DriverTarget>,

    /// Shell command producing one artifact at $KMIRROR_OUTPUT_PATH
    #[arg(long, value_name = "CMD")]
    build_command: String,

    #[arg(long, default_value = "falco")]
    artifact_prefix: String,

    /// Number of concurrent workers
    #[arg(long, short = 'j', default_value_t = default_worker_count())]
    parallelism: usize,

    /// Tasks buffered before publishers run them inline
    #[arg(long, default_value_t = DEFAULT_BUFFER)]
    buffer: usize,

    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    sentinel_interval: Duration,

    /// Consecutive drained polls before the queue is closed
    #[arg(long, default_value_t = DEFAULT_QUIET_THRESHOLD)]
    quiet_threshold: u32,

    /// Create new releases as drafts
    #[arg(long)]
    draft: bool,

    /// Publish into an in-memory store instead of GitHub
    #[arg(long)]
    dry_run: bool,
}

impl MirrorArgs {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            workers: self.parallelism.max(1),
            queue: QueueOptions {
                buffer: self.buffer.max(1),
                sentinel_interval: self.sentinel_interval,
                quiet_threshold: self.quiet_threshold.max(1),
                ..Default::default()
            },
        }
    }

    #[instrument(skip(self, config), fields(manifest = %self.manifest.display(), drivers = self.drivers.len()))]
    pub async fn run(&self, config: Config) -> Result<()> {
        let operating_system = Arc::new(ManifestOperatingSystem::load(&self.manifest)?);
        let builder = Arc::new(CommandBuilder::new(self.build_command.clone()));
        let draft = self.draft || config.draft_releases;
        let config = config.with_draft_releases(draft);
        if !self.dry_run {
            config.require_token()?;
        }

        let shutdown = ShutdownSignal::new();
        let ctrl_c_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing in-flight tasks before exiting");
                ctrl_c_shutdown.cancel();
            }
        });

        let options = self.engine_options();
        let dry_run = self.dry_run;
        let drivers = self.drivers.clone();
        let artifact_prefix = self.artifact_prefix.clone();
        info!(
            workers = options.workers,
            buffer = options.queue.buffer,
            dry_run,
            "Starting mirror run"
        );

        // The GitHub client is blocking, so the whole run lives on a blocking
        // thread; the engine spawns its own workers from there.
        let report = tokio::task::spawn_blocking(move || -> Result<RunReport> {
            let store: Arc<dyn ReleaseStore> = if dry_run {
                Arc::new(MemoryReleaseStore::new())
            } else {
                Arc::new(GithubReleases::new(config.clone())?)
            };
            let cache = Arc::new(ReleaseCache::new(store));
            let publisher = Publisher::new(cache)
                .with_tag_prefix_len(config.tag_prefix_len)
                .with_draft_releases(config.draft_releases);
            let ctx = Arc::new(MirrorContext {
                operating_system,
                builder,
                publisher: Arc::new(publisher),
                drivers,
                artifact_prefix,
            });
            Engine::new(options).run(vec![ctx.root_task()], shutdown)
        })
        .await
        .map_err(|e| KmError::Generic(format!("Mirror run aborted: {e}")))??;

        print_report(&report);
        if report.cancelled {
            return Err(KmError::Generic("mirror run was cancelled".to_string()));
        }
        if !report.is_success() {
            return Err(KmError::Generic(format!(
                "{} task(s) failed",
                report.failures.len()
            )));
        }
        Ok(())
    }
}

fn print_report(report: &RunReport) {
    let headline = format!(
        "{} task(s) executed ({} inline) in {:.1}s",
        report.executed, report.inline_executions, report.duration_secs
    );
    if report.is_success() {
        println!("{}{}", "==> ".bold().blue(), headline.bold());
        return;
    }
    println!("{}{}", "==> ".bold().yellow(), headline.bold());
    if report.cancelled {
        println!("  {} task(s) skipped after cancellation", report.skipped);
    }
    for (message, tasks) in report.failure_groups() {
        println!("  {} {}", format!("{}x", tasks.len()).red().bold(), message);
        for task in tasks {
            println!("    - {task}");
        }
    }
}

/// Parses `VERSION` or `LABEL=VERSION`.
pub fn parse_driver(raw: &str) -> std::result::Result<DriverTarget, String> {
    let (label, version) = match raw.split_once('=') {
        Some((label, version)) => (Some(label.trim()), version.trim()),
        None => (None, raw.trim()),
    };
    if version.is_empty() {
        return Err(format!("driver '{raw}' has an empty version"));
    }
    let target = DriverTarget::new(version);
    Ok(match label {
        Some("") => return Err(format!("driver '{raw}' has an empty label")),
        Some(label) => target.with_label(label),
        None => target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_with_and_without_label() {
        let plain = parse_driver("2aa88dcf6243982697811df4c1b484bcbe9488a2").unwrap();
        assert_eq!(plain.label, None);
        assert_eq!(plain.display_name(), "2aa88dcf6243982697811df4c1b484bcbe9488a2");

        let labelled = parse_driver("0.29.1=17f5df52a7d9ed6bb12d3b1768460def8439936d").unwrap();
        assert_eq!(labelled.label.as_deref(), Some("0.29.1"));
        assert_eq!(labelled.version, "17f5df52a7d9ed6bb12d3b1768460def8439936d");
    }

    #[test]
    fn empty_driver_parts_are_rejected() {
        assert!(parse_driver("").is_err());
        assert!(parse_driver("0.29.1=").is_err());
        assert!(parse_driver("=abc").is_err());
    }
}
