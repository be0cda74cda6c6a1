// kmirror/src/cli/list_packages.rs
use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use kmirror_common::error::Result;
use kmirror_core::mirror::OperatingSystem;

use crate::manifest::ManifestOperatingSystem;

#[derive(Debug, Args)]
pub struct ListPackagesArgs {
    #[arg(value_name = "MANIFEST")]
    manifest: PathBuf,
}

impl ListPackagesArgs {
    pub fn run(&self) -> Result<()> {
        let os = ManifestOperatingSystem::load(&self.manifest)?;
        let names = os.kernel_package_names()?;
        if names.is_empty() {
            println!("{}", format!("0 kernel packages for {}", os.name()).yellow());
            return Ok(());
        }
        println!(
            "{}{}",
            "==> ".bold().blue(),
            format!("{} kernel packages for {}", names.len(), os.name()).bold()
        );
        for name in names {
            let package = os.kernel_package(&name)?;
            println!(
                "{:<48} {} {}",
                name,
                package.kernel_release.cyan(),
                package.kernel_machine.dimmed()
            );
        }
        Ok(())
    }
}
