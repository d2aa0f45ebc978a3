//! Engine configuration.

mod engine;

pub use engine::{CheckpointConfig, EngineConfig};
