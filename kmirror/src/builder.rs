// kmirror/src/builder.rs
use std::process::Command;

use kmirror_common::error::{KmError, Result};
use kmirror_common::model::{BuildRequest, BuiltArtifact};
use kmirror_core::mirror::ArtifactBuilder;
use tracing::debug;

/// Line a build command may print to report the driver version it actually
/// built against.
const DRIVER_VERSION_MARKER: &str = "KMIRROR_BUILT_DRIVER_VERSION=";
const STDERR_TAIL_LINES: usize = 20;

/// Builds artifacts by running a shell command.
///
/// The command sees the target through environment variables and must write
/// the artifact to `$KMIRROR_OUTPUT_PATH`:
///
/// | variable                    | value                          |
/// |-----------------------------|--------------------------------|
/// | `KMIRROR_UNAME_R`           | kernel release                 |
/// | `KMIRROR_UNAME_V`           | kernel version                 |
/// | `KMIRROR_UNAME_M`           | kernel machine                 |
/// | `KMIRROR_OPERATING_SYSTEM`  | operating system name          |
/// | `KMIRROR_KERNEL_PACKAGE`    | kernel package name            |
/// | `KMIRROR_DRIVER_VERSION`    | driver version to build        |
/// | `KMIRROR_ARTIFACT_NAME`     | file name of the artifact      |
/// | `KMIRROR_OUTPUT_PATH`       | where the artifact must go     |
pub struct CommandBuilder {
    shell: String,
    command: String,
}

impl CommandBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            shell: "sh".to_string(),
            command: command.into(),
        }
    }
}

impl ArtifactBuilder for CommandBuilder {
    fn build(&self, request: &BuildRequest) -> Result<BuiltArtifact> {
        let output_path = request.output_path();
        let package = &request.kernel_package;
        debug!("Running build command for {}", request.target_id());

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .env("KMIRROR_UNAME_R", &package.kernel_release)
            .env("KMIRROR_UNAME_V", &package.kernel_version)
            .env("KMIRROR_UNAME_M", &package.kernel_machine)
            .env("KMIRROR_OPERATING_SYSTEM", &package.operating_system)
            .env("KMIRROR_KERNEL_PACKAGE", &package.name)
            .env("KMIRROR_DRIVER_VERSION", &request.driver.version)
            .env("KMIRROR_ARTIFACT_NAME", &request.artifact_name)
            .env("KMIRROR_OUTPUT_PATH", &output_path)
            .current_dir(&request.output_dir)
            .output()
            .map_err(|e| {
                KmError::CommandExecError(format!("Failed to spawn '{}': {}", self.shell, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KmError::BuildError {
                target: request.target_id(),
                message: format!("build command exited with {}: {}", output.status, tail(&stderr)),
            });
        }
        if !output_path.is_file() {
            return Err(KmError::BuildError {
                target: request.target_id(),
                message: format!(
                    "build command succeeded but produced no artifact at {}",
                    output_path.display()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let driver_version = stdout
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix(DRIVER_VERSION_MARKER))
            .map(str::to_string)
            .unwrap_or_else(|| request.driver.version.clone());
        if driver_version.is_empty() {
            return Err(KmError::BuildError {
                target: request.target_id(),
                message: "build command reported an empty driver version".to_string(),
            });
        }

        Ok(BuiltArtifact {
            driver_version,
            path: output_path,
        })
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
