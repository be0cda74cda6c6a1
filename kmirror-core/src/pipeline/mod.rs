pub mod engine;
pub mod worker;

pub use engine::{Engine, EngineOptions};
pub use worker::WorkerPool;
