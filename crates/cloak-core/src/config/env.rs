use std::path::PathBuf;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_index();
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_retrieval();
        if let Ok(v) = std::env::var("CLOAK_LOG_FILE") {
            self.log.file = (!v.is_empty()).then(|| PathBuf::from(v));
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("CLOAK_INDEX_DIR") {
            self.index.index_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CLOAK_KEY_PATH") {
            self.index.key_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CLOAK_CHUNK_SIZE") {
            if let Ok(size) = v.parse::<usize>() {
                self.index.chunk_size = size;
            } else {
                tracing::warn!("ignoring invalid CLOAK_CHUNK_SIZE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CLOAK_CHUNK_OVERLAP") {
            if let Ok(overlap) = v.parse::<usize>() {
                self.index.chunk_overlap = overlap;
            } else {
                tracing::warn!("ignoring invalid CLOAK_CHUNK_OVERLAP value: {v}");
            }
        }
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("CLOAK_EMBED_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.to_lowercase())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CLOAK_EMBED_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CLOAK_EMBED_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("CLOAK_EMBED_MODEL") {
            self.embedding.model = v;
        }
    }

    fn apply_env_overrides_retrieval(&mut self) {
        if let Ok(v) = std::env::var("CLOAK_RETRIEVAL_PRESET") {
            match v.parse() {
                Ok(preset) => self.retrieval.preset = preset,
                Err(e) => tracing::warn!("ignoring CLOAK_RETRIEVAL_PRESET: {e}"),
            }
        }
        if let Ok(v) = std::env::var("CLOAK_RETRIEVAL_TOP_K") {
            if let Ok(top_k) = v.parse::<usize>() {
                self.retrieval.top_k = Some(top_k);
            } else {
                tracing::warn!("ignoring invalid CLOAK_RETRIEVAL_TOP_K value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CLOAK_RETRIEVAL_ALPHA") {
            if let Ok(alpha) = v.parse::<f32>() {
                self.retrieval.alpha = alpha;
            } else {
                tracing::warn!("ignoring invalid CLOAK_RETRIEVAL_ALPHA value: {v}");
            }
        }
    }
}
