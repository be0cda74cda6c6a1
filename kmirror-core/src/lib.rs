// kmirror-core/src/lib.rs

// Declare the top-level modules within the library crate
pub mod mirror;
pub mod pipeline;
pub mod queue;
pub mod repository;

// Re-export key types for easier use by the CLI crate
pub use mirror::{ArtifactBuilder, MirrorContext, OperatingSystem};
pub use pipeline::{Engine, EngineOptions};
pub use queue::{QueueOptions, ShutdownSignal, Task, WorkQueue};
pub use repository::{MemoryReleaseStore, Publisher, ReleaseCache};
