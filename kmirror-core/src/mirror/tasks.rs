// kmirror-core/src/mirror/tasks.rs
use std::fs;
use std::sync::Arc;

use kmirror_common::error::{KmError, Result};
use kmirror_common::model::{BuildRequest, DriverTarget, KernelPackage};
use tracing::{debug, info, warn};

use super::MirrorContext;
use crate::queue::{Task, WorkQueue};

/// Enumerates the operating system's kernel packages and publishes one
/// [`ResolveKernelPackageTask`] per package.
pub struct ListKernelPackagesTask {
    ctx: Arc<MirrorContext>,
}

impl ListKernelPackagesTask {
    pub fn new(ctx: Arc<MirrorContext>) -> Self {
        Self { ctx }
    }
}

impl Task for ListKernelPackagesTask {
    fn name(&self) -> String {
        format!("list-kernel-packages:{}", self.ctx.operating_system.name())
    }

    fn execute(self: Box<Self>, queue: &WorkQueue) -> Result<()> {
        let _ack = queue.ack_on_drop();
        let names = self.ctx.operating_system.kernel_package_names()?;
        info!(
            operating_system = self.ctx.operating_system.name(),
            packages = names.len(),
            "discovered kernel packages"
        );
        for name in names {
            queue.publish(Box::new(ResolveKernelPackageTask::new(
                Arc::clone(&self.ctx),
                name,
            )));
        }
        Ok(())
    }
}

/// Resolves one kernel package and fans out a [`BuildArtifactTask`] per
/// driver version.
pub struct ResolveKernelPackageTask {
    ctx: Arc<MirrorContext>,
    package_name: String,
}

impl ResolveKernelPackageTask {
    pub fn new(ctx: Arc<MirrorContext>, package_name: String) -> Self {
        Self { ctx, package_name }
    }
}

impl Task for ResolveKernelPackageTask {
    fn name(&self) -> String {
        format!("resolve:{}", self.package_name)
    }

    fn execute(self: Box<Self>, queue: &WorkQueue) -> Result<()> {
        let _ack = queue.ack_on_drop();
        let mut package = self.ctx.operating_system.kernel_package(&self.package_name)?;
        if package.operating_system.is_empty() {
            package.operating_system = self.ctx.operating_system.name().to_string();
        }
        debug!(
            package = %package.name,
            kernel_release = %package.kernel_release,
            "resolved kernel package"
        );
        for driver in &self.ctx.drivers {
            queue.publish(Box::new(BuildArtifactTask::new(
                Arc::clone(&self.ctx),
                package.clone(),
                driver.clone(),
            )));
        }
        Ok(())
    }
}

/// Builds and publishes the artifact for one kernel package and driver
/// version, unless it is already published.
pub struct BuildArtifactTask {
    ctx: Arc<MirrorContext>,
    package: KernelPackage,
    driver: DriverTarget,
}

impl BuildArtifactTask {
    pub fn new(ctx: Arc<MirrorContext>, package: KernelPackage, driver: DriverTarget) -> Self {
        Self {
            ctx,
            package,
            driver,
        }
    }

    fn artifact_name(&self) -> String {
        self.package.artifact_name(&self.ctx.artifact_prefix)
    }
}

impl Task for BuildArtifactTask {
    fn name(&self) -> String {
        format!("build:{}@{}", self.artifact_name(), self.driver.display_name())
    }

    fn execute(self: Box<Self>, queue: &WorkQueue) -> Result<()> {
        let _ack = queue.ack_on_drop();
        let artifact_name = self.artifact_name();
        let publisher = &self.ctx.publisher;

        if publisher.is_already_published(&self.driver.version, &artifact_name)? {
            info!(
                artifact = %artifact_name,
                driver = self.driver.display_name(),
                "already published, skipping build"
            );
            return Ok(());
        }

        let output_dir = tempfile::Builder::new()
            .prefix("kmirror-build-")
            .tempdir()?;
        let request = BuildRequest {
            kernel_package: self.package.clone(),
            driver: self.driver.clone(),
            artifact_name: artifact_name.clone(),
            output_dir: output_dir.path().to_path_buf(),
        };

        info!(build_target = %request.target_id(), "building artifact");
        let built = self.ctx.builder.build(&request).map_err(|e| match e {
            KmError::BuildError { .. } => e,
            other => KmError::BuildError {
                target: request.target_id(),
                message: other.to_string(),
            },
        })?;

        if built.driver_version != self.driver.version {
            warn!(
                requested = %self.driver.version,
                built = %built.driver_version,
                "builder reported a different driver version, publishing under the built one"
            );
        }

        let content = fs::read(&built.path)?;
        if publisher
            .publish_artifact(&built.driver_version, &artifact_name, &content)?
            .is_none()
        {
            debug!(artifact = %artifact_name, "artifact was built but not uploaded");
        }
        Ok(())
    }
}
