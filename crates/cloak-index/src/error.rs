//! Error types for cloak-index.

/// Errors that can occur while building, persisting, or querying an index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading sources or writing artifacts.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedding provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] cloak_llm::LlmError),

    /// Key management or sealing error.
    #[error("vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),

    /// Rejected chunking or retrieval parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Embeddings disagree with each other or with the index.
    #[error("embedding mismatch: {0}")]
    Embedding(String),

    /// The four snapshot components do not describe the same chunks.
    #[error("snapshot misaligned: {0}")]
    Misaligned(String),

    /// An artifact could not be decoded after decryption.
    #[error("decode failed: {0}")]
    Decode(String),

    /// No usable index has been persisted yet.
    #[error("index not built: {missing} is missing")]
    NotBuilt { missing: String },

    /// A persisted artifact failed authentication or validation.
    #[error("index corrupt or tampered: {artifact}: {reason}")]
    Corrupt { artifact: String, reason: String },

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
