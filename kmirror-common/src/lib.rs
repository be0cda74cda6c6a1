// kmirror-common/src/lib.rs
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;

// Re-export key types
pub use config::Config;
pub use error::{KmError, Result};
pub use model::{Asset, DriverTarget, KernelPackage, Release};
pub use store::ReleaseStore;
