// kmirror/src/manifest.rs
//! Operating systems described by a TOML manifest:
//!
//! ```toml
//! name = "ubuntu"
//!
//! [[kernel_package]]
//! name = "linux-image-4.15.0-147-generic"
//! kernel_release = "4.15.0-147-generic"
//! kernel_version = "#151-Ubuntu SMP Fri Jun 18 19:21:19 UTC 2021"
//! kernel_machine = "x86_64"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use kmirror_common::error::{KmError, Result};
use kmirror_common::model::KernelPackage;
use kmirror_core::mirror::OperatingSystem;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default, rename = "kernel_package")]
    kernel_packages: Vec<KernelPackage>,
}

pub struct ManifestOperatingSystem {
    name: String,
    packages: BTreeMap<String, KernelPackage>,
}

impl ManifestOperatingSystem {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            KmError::Config(format!("Could not read manifest {}: {}", path.display(), e))
        })?;
        let os = Self::parse(&raw)?;
        debug!(
            "Loaded manifest {} ({} kernel packages)",
            path.display(),
            os.packages.len()
        );
        Ok(os)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(raw)?;
        let name = manifest.name.trim().to_string();
        if name.is_empty() {
            return Err(KmError::ValidationError(
                "manifest has an empty operating system name".to_string(),
            ));
        }

        let mut packages = BTreeMap::new();
        for mut package in manifest.kernel_packages {
            if package.kernel_release.trim().is_empty() {
                return Err(KmError::ValidationError(format!(
                    "kernel package '{}' has no kernel_release",
                    package.name
                )));
            }
            if package.operating_system.is_empty() {
                package.operating_system = name.clone();
            }
            let package_name = package.name.clone();
            if packages.insert(package_name.clone(), package).is_some() {
                return Err(KmError::ValidationError(format!(
                    "kernel package '{package_name}' is listed twice"
                )));
            }
        }
        Ok(Self { name, packages })
    }
}

impl OperatingSystem for ManifestOperatingSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn kernel_package_names(&self) -> Result<Vec<String>> {
        Ok(self.packages.keys().cloned().collect())
    }

    fn kernel_package(&self, name: &str) -> Result<KernelPackage> {
        self.packages.get(name).cloned().ok_or_else(|| {
            KmError::NotFound(format!("kernel package '{}' in {}", name, self.name))
        })
    }
}
