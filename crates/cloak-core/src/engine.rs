//! Engine context: one store, one embedder, one indexer and retriever per process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use cloak_index::IndexError;
use cloak_index::detector::{GitRevisionSource, RevisionSource, TreeMetadata, needs_rebuild};
use cloak_index::indexer::{CodeIndexer, IndexOutcome};
use cloak_index::retriever::{CodeRetriever, RetrievedChunk, format_as_context};
use cloak_index::store::{SecureStore, SnapshotLoad};
use cloak_index::watcher::IndexWatcher;
use cloak_llm::any::AnyEmbedder;
use cloak_llm::hashing::HashingEmbedder;
use cloak_llm::ollama::OllamaEmbedder;
use cloak_llm::provider::EmbedProvider as _;
use serde::Serialize;

use crate::config::{Config, EmbedProviderKind, EmbeddingConfig};

/// State of the live snapshot as seen by [`Engine::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SnapshotState {
    Ready { chunks: usize, files: usize },
    NotBuilt { missing: String },
    Corrupt { artifact: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub tree: PathBuf,
    pub index_dir: PathBuf,
    pub recorded_revision: Option<String>,
    /// `None` when the tree is not under version control.
    pub observed_revision: Option<String>,
    pub needs_rebuild: bool,
    pub generation: Option<String>,
    pub snapshot: SnapshotState,
}

pub struct Engine {
    config: Config,
    store: Arc<SecureStore>,
    indexer: Arc<CodeIndexer<AnyEmbedder>>,
    retriever: CodeRetriever<AnyEmbedder>,
}

impl Engine {
    /// Validate `config`, open the key and store, and select the embedder.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the key or index
    /// directory cannot be opened.
    pub fn bootstrap(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding);
        Self::with_parts(config, embedder, Arc::new(GitRevisionSource))
    }

    /// Assemble an engine from an explicit embedder and revision source.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or index directory cannot be opened.
    pub fn with_parts(
        config: Config,
        embedder: AnyEmbedder,
        revisions: Arc<dyn RevisionSource>,
    ) -> anyhow::Result<Self> {
        let store = SecureStore::open(&config.index.index_dir, &config.index.key_path)
            .with_context(|| {
                format!(
                    "failed to open index store at {}",
                    config.index.index_dir.display()
                )
            })?;
        let store = Arc::new(store);
        let provider = Arc::new(embedder);

        let indexer = CodeIndexer::new(Arc::clone(&provider), config.indexer_config()?)
            .with_revision_source(revisions);
        let retriever = CodeRetriever::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            config.retrieval_config(),
        );

        tracing::info!(
            index_dir = %config.index.index_dir.display(),
            embedder = provider.name(),
            preset = %config.retrieval.preset,
            "engine ready"
        );

        Ok(Self {
            config,
            store,
            indexer: Arc::new(indexer),
            retriever,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    /// Rebuild the index for `tree` if its revision moved.
    ///
    /// # Errors
    ///
    /// Propagates any indexing or persistence failure. The previous snapshot
    /// and revision record stay in place.
    pub async fn index(&self, tree: &Path) -> Result<IndexOutcome, IndexError> {
        self.indexer.incremental_index(tree, &self.store).await
    }

    /// Hybrid search; `None` falls back to the configured `top_k` and `alpha`.
    ///
    /// # Errors
    ///
    /// Returns `NotBuilt` or `Corrupt` when no usable snapshot exists,
    /// `InvalidArgument` for an out-of-range `alpha`, or an embedding error.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        alpha: Option<f32>,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let defaults = self.retriever.config();
        self.retriever
            .search(
                query,
                top_k.unwrap_or(defaults.top_k),
                alpha.unwrap_or(defaults.alpha),
            )
            .await
    }

    /// Render `chunks` with the preview limits of the active preset.
    #[must_use]
    pub fn context_for(&self, chunks: &[RetrievedChunk]) -> String {
        let settings = self.config.retrieval.resolved();
        format_as_context(chunks, settings.max_code_preview, settings.max_symbols_shown)
    }

    /// # Errors
    ///
    /// Returns `Io` if the revision record or the generation pointer cannot
    /// be read.
    pub fn status(&self, tree: &Path) -> Result<EngineStatus, IndexError> {
        let recorded = TreeMetadata::load(tree)?.last_commit;
        let observed = self.indexer.observe(tree);
        let snapshot = match self.store.load_for_query()? {
            SnapshotLoad::Ready(snapshot) => SnapshotState::Ready {
                chunks: snapshot.len(),
                files: snapshot.file_count(),
            },
            SnapshotLoad::NotBuilt { missing } => SnapshotState::NotBuilt { missing },
            SnapshotLoad::Corrupt { artifact, reason } => {
                SnapshotState::Corrupt { artifact, reason }
            }
        };

        Ok(EngineStatus {
            tree: tree.to_path_buf(),
            index_dir: self.store.dir().to_path_buf(),
            needs_rebuild: needs_rebuild(recorded.as_deref(), &observed),
            recorded_revision: recorded,
            observed_revision: observed.as_commit().map(str::to_owned),
            generation: self.store.current_generation()?,
            snapshot,
        })
    }

    /// Keep `tree` indexed until the returned watcher is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Watcher` if the filesystem watcher cannot be started.
    pub fn watch(&self, tree: &Path, debounce: Duration) -> Result<IndexWatcher, IndexError> {
        IndexWatcher::start(
            tree,
            Arc::clone(&self.indexer),
            Arc::clone(&self.store),
            debounce,
        )
    }

    /// Release the engine. Snapshots already handed out stay valid until dropped.
    pub fn shutdown(self) {
        tracing::info!(index_dir = %self.store.dir().display(), "engine shut down");
    }
}

/// Build the embedding backend named by the config.
#[must_use]
pub fn create_embedder(config: &EmbeddingConfig) -> AnyEmbedder {
    match config.provider {
        EmbedProviderKind::Hashing => AnyEmbedder::Hashing(HashingEmbedder::new(config.dimensions)),
        EmbedProviderKind::Ollama => {
            AnyEmbedder::Ollama(OllamaEmbedder::new(&config.base_url, config.model.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cloak_llm::mock::MockEmbedder;
    use cloak_llm::provider::EmbedProvider as _;

    use super::*;

    struct FixedRevision(Mutex<Option<String>>);

    impl FixedRevision {
        fn new(commit: &str) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(commit.to_owned()))))
        }

        fn set(&self, commit: &str) {
            *self.0.lock().unwrap() = Some(commit.to_owned());
        }
    }

    impl RevisionSource for FixedRevision {
        fn current_commit(&self, _tree: &Path) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.index.index_dir = dir.join("index");
        config.index.key_path = dir.join("secret.key");
        config.embedding.dimensions = 64;
        config
    }

    fn write_tree(dir: &Path) -> PathBuf {
        let tree = dir.join("tree");
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(
            tree.join("math.py"),
            "def add(a, b):\n    return a + b\n\n\ndef sub(a, b):\n    return a - b\n",
        )
        .unwrap();
        std::fs::write(tree.join("notes.txt"), "not code").unwrap();
        tree
    }

    #[test]
    fn create_embedder_follows_config() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(create_embedder(&config).name(), "hashing");
        config.provider = EmbedProviderKind::Ollama;
        assert_eq!(create_embedder(&config).name(), "ollama");
    }

    #[test]
    fn bootstrap_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.retrieval.alpha = 2.0;
        assert!(Engine::bootstrap(config).is_err());
    }

    #[tokio::test]
    async fn search_before_index_is_not_built() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::bootstrap(test_config(dir.path())).unwrap();
        let err = engine.search("add", None, None).await.unwrap_err();
        assert!(matches!(err, IndexError::NotBuilt { .. }));
    }

    #[tokio::test]
    async fn index_then_search_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let tree = write_tree(dir.path());
        let revisions = FixedRevision::new("c1");
        let engine = Engine::with_parts(
            test_config(dir.path()),
            AnyEmbedder::Mock(MockEmbedder::new(64)),
            revisions.clone(),
        )
        .unwrap();

        let status = engine.status(&tree).unwrap();
        assert!(status.needs_rebuild);
        assert!(matches!(status.snapshot, SnapshotState::NotBuilt { .. }));

        let outcome = engine.index(&tree).await.unwrap();
        let IndexOutcome::Rebuilt(report) = outcome else {
            panic!("expected a rebuild");
        };
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.revision.as_deref(), Some("c1"));

        let hits = engine.search("add", Some(1), None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_path, "math.py");

        let status = engine.status(&tree).unwrap();
        assert!(!status.needs_rebuild);
        assert_eq!(status.recorded_revision.as_deref(), Some("c1"));
        assert!(status.generation.is_some());
        assert_eq!(
            status.snapshot,
            SnapshotState::Ready {
                chunks: report.chunks_created,
                files: 1
            }
        );

        revisions.set("c2");
        assert!(engine.status(&tree).unwrap().needs_rebuild);
    }

    #[tokio::test]
    async fn search_overrides_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let tree = write_tree(dir.path());
        let mut config = test_config(dir.path());
        config.retrieval.max_code_preview = Some(10);
        let engine = Engine::with_parts(
            config,
            AnyEmbedder::Mock(MockEmbedder::new(64)),
            FixedRevision::new("c1"),
        )
        .unwrap();
        engine.index(&tree).await.unwrap();

        let err = engine.search("add", None, Some(1.5)).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument(_)));

        let hits = engine.search("return", Some(1), Some(1.0)).await.unwrap();
        let xml = engine.context_for(&hits);
        assert!(xml.starts_with("<code_context>"));
        assert!(xml.contains("math.py"));
        assert!(xml.contains("..."));
        engine.shutdown();
    }

    #[test]
    fn status_serializes_tagged_state() {
        let state = SnapshotState::Ready {
            chunks: 3,
            files: 2,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["chunks"], 3);
        let json = serde_json::to_value(SnapshotState::NotBuilt {
            missing: "CURRENT".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "not_built");
    }
}
