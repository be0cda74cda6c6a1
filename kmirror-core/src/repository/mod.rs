// kmirror-core/src/repository/mod.rs
//! Release-backed artifact repository: a read-through cache over a
//! [`ReleaseStore`](kmirror_common::store::ReleaseStore) and the publisher
//! that builds on it.

pub mod cache;
pub mod memory;
pub mod publisher;

pub use cache::ReleaseCache;
pub use memory::{MemoryReleaseStore, StoreCalls};
pub use publisher::Publisher;
