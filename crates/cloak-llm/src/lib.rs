//! Embedding provider abstraction and backend implementations.

pub mod any;
pub mod error;
pub mod hashing;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use any::AnyEmbedder;
pub use error::LlmError;
pub use provider::EmbedProvider;
