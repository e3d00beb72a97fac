use crate::error::LlmError;
use crate::hashing::HashingEmbedder;
#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::ollama::OllamaEmbedder;
use crate::provider::EmbedProvider;

/// Generates a match over all `AnyEmbedder` variants, binding the inner embedder
/// and evaluating the given expression for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::Ollama($p) => $expr,
            AnyEmbedder::Hashing($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

/// Runtime-selected embedding backend.
#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Ollama(OllamaEmbedder),
    Hashing(HashingEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl EmbedProvider for AnyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_embedder!(self, |p| p.embed(text).await)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        delegate_embedder!(self, |p| p.embed_batch(texts).await)
    }

    fn name(&self) -> &'static str {
        delegate_embedder!(self, |p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_variant_delegates() {
        let any = AnyEmbedder::Hashing(HashingEmbedder::new(12));
        assert_eq!(any.name(), "hashing");
        let v = any.embed("hello world").await.unwrap();
        assert_eq!(v.len(), 12);
        let batch = any
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn ollama_variant_name() {
        let any = AnyEmbedder::Ollama(OllamaEmbedder::new("http://localhost", "m".into()));
        assert_eq!(any.name(), "ollama");
    }
}
