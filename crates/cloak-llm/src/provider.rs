use std::future::Future;

use crate::error::LlmError;

/// A backend that maps text to fixed-width, L2-normalized vectors.
///
/// Every vector returned by one provider instance has the same length, so the
/// inner product of two of them is their cosine similarity.
pub trait EmbedProvider: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or responds with malformed data.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed a batch of texts, preserving input order.
    ///
    /// Backends with a native batch endpoint override this; the default issues
    /// one request per text.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by any element of the batch.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    fn name(&self) -> &'static str;
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
