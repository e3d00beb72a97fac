//! Hybrid dense + lexical retrieval over the live snapshot.

use std::fmt::Write as _;
use std::sync::Arc;

use cloak_llm::provider::EmbedProvider;
use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::fusion::{DEFAULT_FUSION_K, fuse};
use crate::store::SecureStore;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_ALPHA: f32 = 0.5;

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Weight of the lexical ranking; `0.0` is dense only, `1.0` lexical only.
    pub alpha: f32,
    /// Rank offset in the reciprocal rank fusion denominator.
    pub fusion_k: f32,
}

impl Default for RetrievalConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            alpha: DEFAULT_ALPHA,
            fusion_k: DEFAULT_FUSION_K as f32,
        }
    }
}

/// One ranked chunk with everything a caller needs to cite it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: usize,
    pub chunk_text: String,
    pub source_path: String,
    pub language: String,
    pub symbols: Vec<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub score: f64,
}

/// Fuses dense and BM25 rankings over the snapshot held by a [`SecureStore`].
pub struct CodeRetriever<P: EmbedProvider> {
    store: Arc<SecureStore>,
    provider: Arc<P>,
    config: RetrievalConfig,
}

impl<P: EmbedProvider> CodeRetriever<P> {
    #[must_use]
    pub fn new(store: Arc<SecureStore>, provider: Arc<P>, config: RetrievalConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Search with the configured `top_k` and `alpha`.
    ///
    /// # Errors
    ///
    /// See [`CodeRetriever::search`].
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.search(query, self.config.top_k, self.config.alpha).await
    }

    /// Up to `top_k` chunks ranked by weighted reciprocal rank fusion of the
    /// dense and lexical rankings, each of depth `2 * top_k`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `alpha` outside `[0, 1]`, `NotBuilt` or
    /// `Corrupt` if no valid snapshot is available, or an embedding error.
    pub async fn search(&self, query: &str, top_k: usize, alpha: f32) -> Result<Vec<RetrievedChunk>> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(IndexError::InvalidArgument(format!(
                "alpha must be within [0, 1], got {alpha}"
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.store.load_for_query()?.into_ready()?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let depth = top_k.saturating_mul(2);
        let query_vector = self.provider.embed(query).await?;
        let dense: Vec<usize> = snapshot
            .dense
            .search(&query_vector, depth)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let lexical: Vec<usize> = snapshot
            .lexical
            .search(query, depth)
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let fused = fuse(
            &dense,
            &lexical,
            f64::from(alpha),
            f64::from(self.config.fusion_k),
            top_k,
        );
        tracing::debug!(
            dense = dense.len(),
            lexical = lexical.len(),
            results = fused.len(),
            "hybrid search complete"
        );

        Ok(fused
            .into_iter()
            .filter_map(|hit| {
                let text = snapshot.documents.get(hit.id)?;
                let meta = snapshot.metadatas.get(hit.id)?;
                Some(RetrievedChunk {
                    chunk_id: hit.id,
                    chunk_text: text.clone(),
                    source_path: meta.source_path.clone(),
                    language: meta.language.clone(),
                    symbols: meta.symbols.clone(),
                    chunk_index: meta.chunk_index,
                    total_chunks: meta.total_chunks,
                    score: hit.score,
                })
            })
            .collect())
    }
}

/// Format retrieved chunks as XML for injection into a prompt.
///
/// Code longer than `max_code_preview` characters is cut with a trailing `...`,
/// and at most `max_symbols` symbol names are listed per chunk.
#[must_use]
pub fn format_as_context(chunks: &[RetrievedChunk], max_code_preview: usize, max_symbols: usize) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");
    for chunk in chunks {
        let symbols = chunk
            .symbols
            .iter()
            .take(max_symbols)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "  <chunk file=\"{}\" part=\"{}/{}\" language=\"{}\" symbols=\"{}\" score=\"{:.4}\">",
            chunk.source_path,
            chunk.chunk_index + 1,
            chunk.total_chunks,
            chunk.language,
            symbols,
            chunk.score,
        );
        out.push_str(&preview(&chunk.chunk_text, max_code_preview));
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}

fn preview(code: &str, max_chars: usize) -> String {
    match code.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &code[..cut]),
        None => code.to_owned(),
    }
}
