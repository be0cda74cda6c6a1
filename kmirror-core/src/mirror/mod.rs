// kmirror-core/src/mirror/mod.rs
//! Mirroring driven through the engine: enumerate the kernel packages of an
//! operating system, build an artifact per (package, driver version) and
//! publish what is not published yet.

use std::sync::Arc;

use kmirror_common::error::Result;
use kmirror_common::model::{BuildRequest, BuiltArtifact, DriverTarget, KernelPackage};

use crate::queue::Task;
use crate::repository::Publisher;

pub mod tasks;

pub use tasks::{BuildArtifactTask, ListKernelPackagesTask, ResolveKernelPackageTask};

/// Source of kernel packages for one operating system.
pub trait OperatingSystem: Send + Sync {
    fn name(&self) -> &str;

    fn kernel_package_names(&self) -> Result<Vec<String>>;

    fn kernel_package(&self, name: &str) -> Result<KernelPackage>;
}

/// Produces one artifact for a kernel package and driver version. May take
/// minutes and may fail; the artifact is expected at
/// [`BuildRequest::output_path`].
pub trait ArtifactBuilder: Send + Sync {
    fn build(&self, request: &BuildRequest) -> Result<BuiltArtifact>;
}

/// Everything the mirror tasks share. Passed to every task behind an `Arc`.
pub struct MirrorContext {
    pub operating_system: Arc<dyn OperatingSystem>,
    pub builder: Arc<dyn ArtifactBuilder>,
    pub publisher: Arc<Publisher>,
    pub drivers: Vec<DriverTarget>,
    pub artifact_prefix: String,
}

impl MirrorContext {
    /// The root task of a mirror run.
    pub fn root_task(self: &Arc<Self>) -> Box<dyn Task> {
        Box::new(ListKernelPackagesTask::new(Arc::clone(self)))
    }
}
