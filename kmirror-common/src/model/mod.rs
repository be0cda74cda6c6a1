// kmirror-common/src/model/mod.rs
pub mod artifact;
pub mod kernel;
pub mod release;

// Re-export
pub use artifact::{BuildRequest, BuiltArtifact};
pub use kernel::{DriverTarget, KernelPackage};
pub use release::{Asset, AssetId, NewRelease, Page, Release, ReleaseId};
