// kmirror-common/src/model/artifact.rs
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::kernel::{DriverTarget, KernelPackage};
use crate::error::{KmError, Result};

/// Everything a builder needs to produce one artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRequest {
    pub kernel_package: KernelPackage,
    pub driver: DriverTarget,
    /// File name the artifact is expected to be published as.
    pub artifact_name: String,
    /// Directory the builder writes its output into.
    pub output_dir: PathBuf,
}

impl BuildRequest {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.artifact_name)
    }

    pub fn target_id(&self) -> String {
        format!(
            "{}/{}@{}",
            self.kernel_package.operating_system,
            self.kernel_package.name,
            self.driver.display_name()
        )
    }
}

/// The result of a successful build. The driver version is reported by the
/// builder since it is what the artifact was actually compiled against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuiltArtifact {
    pub driver_version: String,
    pub path: PathBuf,
}

pub fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            KmError::ValidationError(format!("artifact path has no file name: {}", path.display()))
        })
}
