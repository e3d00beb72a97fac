//! Configuration and the engine context for cloak.

pub mod config;
pub mod engine;

pub use config::Config;
pub use engine::{Engine, EngineStatus, SnapshotState};
