//! Test-only mock embedding provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::hashing::HashingEmbedder;
use crate::provider::EmbedProvider;

/// Deterministic embedder that records what it was asked to embed and can be
/// switched into a failing mode.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub inner: HashingEmbedder,
    pub batches: Arc<AtomicUsize>,
    pub seen: Arc<Mutex<Vec<String>>>,
    /// Fail every request once this many batches have succeeded.
    pub fail_after: Option<usize>,
    /// Milliseconds to sleep before answering each request.
    pub delay_ms: u64,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(32)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            inner: HashingEmbedder::new(dimensions),
            batches: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            fail_after: None,
            delay_ms: 0,
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_after: Some(0),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of batch (or single) requests answered successfully so far.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn embedded_texts(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    async fn answer(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self
            .fail_after
            .is_some_and(|limit| self.batches.load(Ordering::SeqCst) >= limit)
        {
            return Err(LlmError::Other("mock embedding failure".into()));
        }
        let vectors = texts
            .iter()
            .map(|t| self.inner.embed_sync(t))
            .collect::<Result<Vec<_>, _>>()?;
        if let Ok(mut seen) = self.seen.lock() {
            seen.extend(texts.iter().cloned());
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(vectors)
    }
}

impl EmbedProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.answer(&[text.to_owned()])
            .await?
            .pop()
            .ok_or(LlmError::EmptyResponse { provider: "mock" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.answer(texts).await
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
