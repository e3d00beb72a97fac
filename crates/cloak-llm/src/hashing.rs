//! Offline embedding backend based on signed feature hashing.
//!
//! Each identifier-like token contributes one word feature plus its boundary-padded
//! character trigrams. Features are hashed with BLAKE3 into a fixed number of
//! buckets, so the output is stable across runs, platforms, and processes.

use crate::error::LlmError;
use crate::provider::{EmbedProvider, normalize};

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Synchronous variant of [`EmbedProvider::embed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder was built with zero dimensions.
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.dimensions == 0 {
            return Err(LlmError::InvalidInput(
                "hashing embedder needs at least one dimension".into(),
            ));
        }

        let mut vector = vec![0.0_f32; self.dimensions];
        for token in tokens(text) {
            self.add_feature(&mut vector, token.as_bytes(), WORD_WEIGHT);

            let padded: Vec<char> = std::iter::once('#')
                .chain(token.chars())
                .chain(std::iter::once('#'))
                .collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                self.add_feature(&mut vector, gram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }
        normalize(&mut vector);
        Ok(vector)
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        #[allow(clippy::cast_possible_truncation)]
        let bucket = (u64::from_le_bytes(head) % self.dimensions as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl EmbedProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_sync(text)
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}
