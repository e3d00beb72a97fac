mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};
use cloak_index::chunker::ChunkerConfig;
use cloak_index::indexer::IndexerConfig;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error describing the first setting that is out of range.
    pub fn validate(&self) -> anyhow::Result<()> {
        let index = &self.index;
        if index.chunk_size == 0 {
            bail!("index.chunk_size must be positive");
        }
        if index.chunk_overlap >= index.chunk_size {
            bail!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                index.chunk_overlap,
                index.chunk_size
            );
        }
        if index.embed_batch_size == 0 {
            bail!("index.embed_batch_size must be positive");
        }
        if index.embed_concurrency == 0 {
            bail!("index.embed_concurrency must be positive");
        }
        if index.code_extensions.is_empty() {
            bail!("index.code_extensions must not be empty");
        }
        if !(0.0..=1.0).contains(&self.retrieval.alpha) {
            bail!(
                "retrieval.alpha must be within [0, 1], got {}",
                self.retrieval.alpha
            );
        }
        if !(self.retrieval.fusion_k.is_finite() && self.retrieval.fusion_k > 0.0) {
            bail!("retrieval.fusion_k must be positive");
        }
        if self.embedding.provider == EmbedProviderKind::Hashing && self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be positive");
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the chunk size and overlap are inconsistent.
    pub fn indexer_config(&self) -> anyhow::Result<IndexerConfig> {
        let chunker = ChunkerConfig::new(self.index.chunk_size, self.index.chunk_overlap)
            .context("invalid chunking parameters")?;
        Ok(IndexerConfig {
            chunker,
            exclude_dirs: self.index.exclude_dirs.clone(),
            code_extensions: self.index.code_extensions.clone(),
            embed_batch_size: self.index.embed_batch_size,
            embed_concurrency: self.index.embed_concurrency,
        })
    }

    #[must_use]
    pub fn retrieval_config(&self) -> cloak_index::retriever::RetrievalConfig {
        cloak_index::retriever::RetrievalConfig {
            top_k: self.retrieval.resolved().top_k,
            alpha: self.retrieval.alpha,
            fusion_k: self.retrieval.fusion_k,
        }
    }
}
