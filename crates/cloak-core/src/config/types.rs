use std::path::PathBuf;
use std::str::FromStr;

use cloak_index::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use cloak_index::indexer::{
    DEFAULT_CODE_EXTENSIONS, DEFAULT_EMBED_BATCH_SIZE, DEFAULT_EMBED_CONCURRENCY,
    DEFAULT_EXCLUDE_DIRS,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from TOML with `CLOAK_*` env overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_index_dir() -> PathBuf {
    PathBuf::from(".cloak/index")
}

fn default_key_path() -> PathBuf {
    PathBuf::from(".cloak/secret.key")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_exclude_dirs() -> Vec<String> {
    DEFAULT_EXCLUDE_DIRS.iter().map(|s| (*s).to_owned()).collect()
}

fn default_code_extensions() -> Vec<String> {
    DEFAULT_CODE_EXTENSIONS
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

fn default_embed_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}

fn default_embed_concurrency() -> usize {
    DEFAULT_EMBED_CONCURRENCY
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    /// age identity used to seal artifacts; generated on first use.
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_code_extensions")]
    pub code_extensions: Vec<String>,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            key_path: default_key_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            exclude_dirs: default_exclude_dirs(),
            code_extensions: default_code_extensions(),
            embed_batch_size: default_embed_batch_size(),
            embed_concurrency: default_embed_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedProviderKind {
    /// Offline feature hashing; no external service.
    #[default]
    Hashing,
    Ollama,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_dimensions() -> usize {
    384
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbedProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector width of the hashing backend. Ollama models fix their own width.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbedProviderKind::default(),
            base_url: default_base_url(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
        }
    }
}

/// Named bundle of retrieval and presentation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    UltraFast,
    #[default]
    Balanced,
    Quality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetSettings {
    pub top_k: usize,
    pub max_code_preview: usize,
    pub max_symbols_shown: usize,
}

impl Preset {
    pub const ALL: [Self; 3] = [Self::UltraFast, Self::Balanced, Self::Quality];

    #[must_use]
    pub fn settings(self) -> PresetSettings {
        match self {
            Self::UltraFast => PresetSettings {
                top_k: 2,
                max_code_preview: 250,
                max_symbols_shown: 3,
            },
            Self::Balanced => PresetSettings {
                top_k: 3,
                max_code_preview: 400,
                max_symbols_shown: 3,
            },
            Self::Quality => PresetSettings {
                top_k: 4,
                max_code_preview: 400,
                max_symbols_shown: 3,
            },
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UltraFast => "ultra_fast",
            Self::Balanced => "balanced",
            Self::Quality => "quality",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown preset {s:?}, expected ultra_fast, balanced, or quality"))
    }
}

fn default_alpha() -> f32 {
    0.5
}

fn default_fusion_k() -> f32 {
    60.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub preset: Preset,
    /// Lexical weight in fusion; `0.0` dense only, `1.0` lexical only.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_fusion_k")]
    pub fusion_k: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_code_preview: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_symbols_shown: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            preset: Preset::default(),
            alpha: default_alpha(),
            fusion_k: default_fusion_k(),
            top_k: None,
            max_code_preview: None,
            max_symbols_shown: None,
        }
    }
}

impl RetrievalConfig {
    /// Preset values with any explicit overrides applied.
    #[must_use]
    pub fn resolved(&self) -> PresetSettings {
        let base = self.preset.settings();
        PresetSettings {
            top_k: self.top_k.unwrap_or(base.top_k),
            max_code_preview: self.max_code_preview.unwrap_or(base.max_code_preview),
            max_symbols_shown: self.max_symbols_shown.unwrap_or(base.max_symbols_shown),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}
