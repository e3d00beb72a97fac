//! Indexing orchestrator: detect change → walk → chunk → embed → persist → record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cloak_llm::provider::EmbedProvider;
use futures::StreamExt as _;

use crate::chunker::{ChunkerConfig, CodeChunk, chunk_file};
use crate::dense::DenseIndex;
use crate::detector::{
    GitRevisionSource, Revision, RevisionSource, TreeMetadata, needs_rebuild, observe,
};
use crate::error::{IndexError, Result};
use crate::lexical::LexicalIndex;
use crate::snapshot::{ChunkMetadata, IndexSnapshot};
use crate::store::SecureStore;

pub const DEFAULT_EXCLUDE_DIRS: &[&str] =
    &[".git", "node_modules", "__pycache__", "venv", ".venv", "build"];
pub const DEFAULT_CODE_EXTENSIONS: &[&str] =
    &["py", "js", "java", "ts", "cpp", "c", "go", "jsx", "tsx", "rs"];
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;
pub const DEFAULT_EMBED_CONCURRENCY: usize = 4;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Directory names pruned wherever they appear below the tree root.
    pub exclude_dirs: Vec<String>,
    /// File extensions (without the dot) that are indexed.
    pub code_extensions: Vec<String>,
    pub embed_batch_size: usize,
    /// Maximum number of embedding batches in flight.
    pub embed_concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| (*s).to_owned()).collect(),
            code_extensions: DEFAULT_CODE_EXTENSIONS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            embed_concurrency: DEFAULT_EMBED_CONCURRENCY,
        }
    }
}

impl IndexerConfig {
    /// True if `path` has one of the configured code extensions.
    #[must_use]
    pub fn is_code_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.code_extensions
                    .iter()
                    .any(|c| c.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }
}

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// Commit recorded for this build; `None` for untracked trees.
    pub revision: Option<String>,
}

/// Result of [`CodeIndexer::incremental_index`].
#[derive(Debug)]
pub enum IndexOutcome {
    /// The recorded commit matches the tree; nothing was touched.
    UpToDate { revision: String },
    Rebuilt(IndexReport),
}

/// Orchestrates full rebuilds of a tree's index.
pub struct CodeIndexer<P: EmbedProvider> {
    provider: Arc<P>,
    revisions: Arc<dyn RevisionSource>,
    config: IndexerConfig,
}

impl<P: EmbedProvider> CodeIndexer<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: IndexerConfig) -> Self {
        Self {
            provider,
            revisions: Arc::new(GitRevisionSource),
            config,
        }
    }

    #[must_use]
    pub fn with_revision_source(mut self, revisions: Arc<dyn RevisionSource>) -> Self {
        self.revisions = revisions;
        self
    }

    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Current revision of `root` according to the configured source.
    #[must_use]
    pub fn observe(&self, root: &Path) -> Revision {
        observe(self.revisions.as_ref(), root)
    }

    /// Rebuild the index for `root` if its revision changed since the last
    /// successful build, then record the new revision.
    ///
    /// The snapshot is published before the revision is recorded, so a failure
    /// at any step leaves both the previous snapshot and the previous record
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns an error if walking, embedding, persisting, or recording fails.
    pub async fn incremental_index(&self, root: &Path, store: &SecureStore) -> Result<IndexOutcome> {
        let observed = self.observe(root);
        let recorded = TreeMetadata::load(root)?;

        if !needs_rebuild(recorded.last_commit.as_deref(), &observed) {
            let revision = observed.as_commit().unwrap_or_default().to_owned();
            tracing::info!(tree = %root.display(), revision = %revision, "index up to date");
            return Ok(IndexOutcome::UpToDate { revision });
        }

        match &observed {
            Revision::Commit(id) => tracing::info!(
                tree = %root.display(),
                previous = recorded.last_commit.as_deref().unwrap_or("none"),
                current = %id,
                "revision changed, rebuilding index"
            ),
            Revision::Untracked => tracing::warn!(
                tree = %root.display(),
                "tree is not under version control, forcing full rebuild"
            ),
        }

        let start = std::time::Instant::now();
        let (snapshot, mut report) = self.build(root).await?;
        store.persist(snapshot)?;

        let revision = observed.as_commit().map(str::to_owned);
        TreeMetadata {
            last_commit: revision.clone(),
        }
        .save(root)?;

        report.revision = revision;
        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            files = report.files_indexed,
            chunks = report.chunks_created,
            skipped = report.files_skipped,
            duration_ms = report.duration_ms,
            "index rebuilt"
        );
        Ok(IndexOutcome::Rebuilt(report))
    }

    /// Walk, chunk, and embed `root` into a fresh snapshot without persisting it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `root` is not a directory, or `Embedding` /
    /// `Llm` if any batch fails to embed.
    pub async fn build(&self, root: &Path) -> Result<(IndexSnapshot, IndexReport)> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        let files = collect_source_files(root, &self.config, &mut report)?;
        let total = files.len();
        tracing::info!(tree = %root.display(), total, "indexing started");

        let mut chunks: Vec<CodeChunk> = Vec::new();
        for path in &files {
            report.files_scanned += 1;
            let rel_path = relative_path(root, path);
            match read_source(path).await {
                Ok(source) => {
                    let file_chunks = chunk_file(&source, &rel_path, &self.config.chunker);
                    tracing::debug!(file = %rel_path, chunks = file_chunks.len(), "file chunked");
                    if !file_chunks.is_empty() {
                        report.files_indexed += 1;
                    }
                    chunks.extend(file_chunks);
                }
                Err(e) => {
                    tracing::warn!(file = %rel_path, "skipping unreadable file: {e}");
                    report.errors.push(format!("{rel_path}: {e}"));
                    report.files_skipped += 1;
                }
            }
        }

        let mut documents = Vec::with_capacity(chunks.len());
        let mut metadatas = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            metadatas.push(ChunkMetadata {
                source_path: chunk.source_path,
                language: chunk.language,
                symbols: chunk.symbols,
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
            });
            documents.push(chunk.text);
        }
        report.chunks_created = documents.len();

        let vectors = self.embed_all(&documents).await?;
        let dense = DenseIndex::from_vectors(&vectors)?;
        let lexical = LexicalIndex::build(&documents);
        let snapshot = IndexSnapshot::new(documents, metadatas, dense, lexical)?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok((snapshot, report))
    }

    async fn embed_all(&self, documents: &[String]) -> Result<Vec<Vec<f32>>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = self.config.embed_batch_size.max(1);
        let concurrency = self.config.embed_concurrency.max(1);

        let batches: Vec<&[String]> = documents.chunks(batch_size).collect();
        let pending: Vec<_> = batches
            .iter()
            .map(|&batch| self.provider.embed_batch(batch))
            .collect();
        let results: Vec<_> = futures::stream::iter(pending)
            .buffered(concurrency)
            .collect()
            .await;

        let mut vectors = Vec::with_capacity(documents.len());
        for (batch, result) in batches.iter().zip(results) {
            let embedded = result?;
            if embedded.len() != batch.len() {
                return Err(IndexError::Embedding(format!(
                    "provider {} returned {} vectors for a batch of {}",
                    self.provider.name(),
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        tracing::debug!(count = vectors.len(), provider = self.provider.name(), "chunks embedded");
        Ok(vectors)
    }
}

/// Files under `root` with a configured extension, depth-first in file-name order.
fn collect_source_files(
    root: &Path,
    config: &IndexerConfig,
    report: &mut IndexReport,
) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(IndexError::InvalidArgument(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let excluded: HashSet<String> = config.exclude_dirs.iter().cloned().collect();
    let mut builder = ignore::WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            let name = entry.file_name().to_string_lossy();
            !(is_dir && entry.depth() > 0 && excluded.contains(&*name))
        });

    let mut files = Vec::new();
    for entry in builder.build() {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_some_and(|ft| ft.is_file())
                    && config.is_code_file(entry.path())
                {
                    files.push(entry.into_path());
                }
            }
            Err(e) => {
                tracing::warn!("walk error: {e}");
                report.errors.push(e.to_string());
            }
        }
    }
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn read_source(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), "invalid UTF-8 replaced");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cloak_llm::mock::MockEmbedder;

    use super::*;
    use crate::store::SnapshotLoad;

    struct Scripted(Mutex<Option<String>>);

    impl Scripted {
        fn new(commit: Option<&str>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(commit.map(str::to_owned))))
        }

        fn set(&self, commit: Option<&str>) {
            *self.0.lock().unwrap() = commit.map(str::to_owned);
        }
    }

    impl RevisionSource for Scripted {
        fn current_commit(&self, _tree: &Path) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.py", "def alpha():\n    return 1\n");
        write(dir.path(), "src/b.rs", "fn beta() {}\n");
        write(dir.path(), "README.md", "# not code\n");
        write(dir.path(), "node_modules/dep/index.js", "function dep() {}\n");
        write(dir.path(), "pkg/node_modules/x.js", "function nested() {}\n");
        write(dir.path(), "pkg/build/gen.go", "package gen\n");
        write(dir.path(), "pkg/util.go", "package pkg\n\nfunc Util() {}\n");
        dir
    }

    fn indexer(mock: &MockEmbedder) -> CodeIndexer<MockEmbedder> {
        CodeIndexer::new(Arc::new(mock.clone()), IndexerConfig::default())
    }

    fn sources(snapshot: &IndexSnapshot) -> Vec<&str> {
        snapshot
            .metadatas
            .iter()
            .map(|m| m.source_path.as_str())
            .collect()
    }

    #[tokio::test]
    async fn build_walks_sorted_and_prunes_excluded() {
        let dir = tree();
        let (snapshot, report) = indexer(&MockEmbedder::new(16)).build(dir.path()).await.unwrap();
        assert_eq!(sources(&snapshot), vec!["pkg/util.go", "src/a.py", "src/b.rs"]);
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.files_indexed, 3);
        assert_eq!(report.chunks_created, 3);
        snapshot.check_alignment().unwrap();
    }

    #[tokio::test]
    async fn build_is_deterministic() {
        let dir = tree();
        let mock = MockEmbedder::new(16);
        let (first, _) = indexer(&mock).build(dir.path()).await.unwrap();
        let (second, _) = indexer(&mock).build(dir.path()).await.unwrap();
        assert_eq!(first.documents, second.documents);
        assert_eq!(first.metadatas, second.metadatas);
        assert_eq!(first.dense, second.dense);
    }

    #[tokio::test]
    async fn batches_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..7 {
            write(dir.path(), &format!("m{i}.py"), &format!("def f{i}(): pass\n"));
        }
        let mock = MockEmbedder::new(8);
        let config = IndexerConfig {
            embed_batch_size: 2,
            embed_concurrency: 3,
            ..IndexerConfig::default()
        };
        let indexer = CodeIndexer::new(Arc::new(mock.clone()), config);
        let (snapshot, _) = indexer.build(dir.path()).await.unwrap();
        assert_eq!(mock.batch_count(), 4);

        let reference = cloak_llm::hashing::HashingEmbedder::new(8);
        for (id, doc) in snapshot.documents.iter().enumerate() {
            let expected = reference.embed_sync(doc).unwrap();
            assert_eq!(snapshot.dense.vector(id), Some(expected.as_slice()));
        }
    }

    #[tokio::test]
    async fn symbols_attached_to_chunks() {
        let dir = tree();
        let (snapshot, _) = indexer(&MockEmbedder::new(8)).build(dir.path()).await.unwrap();
        let a = snapshot
            .metadatas
            .iter()
            .find(|m| m.source_path == "src/a.py")
            .unwrap();
        assert_eq!(a.language, "python");
        #[cfg(feature = "lang-python")]
        assert_eq!(a.symbols, vec!["alpha"]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.py"), b"x = '\xff\xfe'\n").unwrap();
        let (snapshot, report) = indexer(&MockEmbedder::new(8)).build(dir.path()).await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert!(snapshot.documents[0].contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn empty_tree_builds_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (snapshot, report) = indexer(&MockEmbedder::new(8)).build(dir.path()).await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(report.files_scanned, 0);
    }

    #[tokio::test]
    async fn missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = indexer(&MockEmbedder::new(8))
            .build(&dir.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unchanged_revision_is_idempotent() {
        let dir = tree();
        let store_dir = tempfile::tempdir().unwrap();
        let store = SecureStore::open(&store_dir.path().join("idx"), &store_dir.path().join("k"))
            .unwrap();
        let mock = MockEmbedder::new(8);
        let revisions = Scripted::new(Some("rev1"));
        let indexer = indexer(&mock).with_revision_source(revisions.clone());

        let first = indexer.incremental_index(dir.path(), &store).await.unwrap();
        assert!(matches!(first, IndexOutcome::Rebuilt(ref r) if r.revision.as_deref() == Some("rev1")));
        let generation = store.current_generation().unwrap();
        let calls = mock.batch_count();

        let second = indexer.incremental_index(dir.path(), &store).await.unwrap();
        assert!(matches!(second, IndexOutcome::UpToDate { ref revision } if revision == "rev1"));
        assert_eq!(mock.batch_count(), calls);
        assert_eq!(store.current_generation().unwrap(), generation);

        revisions.set(Some("rev2"));
        let third = indexer.incremental_index(dir.path(), &store).await.unwrap();
        assert!(matches!(third, IndexOutcome::Rebuilt(_)));
        assert_ne!(store.current_generation().unwrap(), generation);
        assert_eq!(
            TreeMetadata::load(dir.path()).unwrap().last_commit.as_deref(),
            Some("rev2")
        );
    }

    #[tokio::test]
    async fn untracked_tree_always_rebuilds() {
        let dir = tree();
        let store_dir = tempfile::tempdir().unwrap();
        let store = SecureStore::open(&store_dir.path().join("idx"), &store_dir.path().join("k"))
            .unwrap();
        let indexer = indexer(&MockEmbedder::new(8)).with_revision_source(Scripted::new(None));

        for _ in 0..2 {
            let outcome = indexer.incremental_index(dir.path(), &store).await.unwrap();
            assert!(matches!(outcome, IndexOutcome::Rebuilt(ref r) if r.revision.is_none()));
        }
        assert_eq!(TreeMetadata::load(dir.path()).unwrap().last_commit, None);
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_state() {
        let dir = tree();
        let store_dir = tempfile::tempdir().unwrap();
        let store = SecureStore::open(&store_dir.path().join("idx"), &store_dir.path().join("k"))
            .unwrap();
        let revisions = Scripted::new(Some("rev1"));

        let good = indexer(&MockEmbedder::new(8)).with_revision_source(revisions.clone());
        good.incremental_index(dir.path(), &store).await.unwrap();
        let generation = store.current_generation().unwrap();

        revisions.set(Some("rev2"));
        let bad = indexer(&MockEmbedder::failing()).with_revision_source(revisions.clone());
        assert!(bad.incremental_index(dir.path(), &store).await.is_err());

        assert_eq!(store.current_generation().unwrap(), generation);
        assert_eq!(
            TreeMetadata::load(dir.path()).unwrap().last_commit.as_deref(),
            Some("rev1")
        );
        assert!(matches!(store.load_for_query().unwrap(), SnapshotLoad::Ready(_)));
    }

    #[test]
    fn code_file_matching_ignores_case_and_dots() {
        let config = IndexerConfig {
            code_extensions: vec![".PY".into(), "rs".into()],
            ..IndexerConfig::default()
        };
        assert!(config.is_code_file(Path::new("a/b.py")));
        assert!(config.is_code_file(Path::new("lib.RS")));
        assert!(!config.is_code_file(Path::new("notes.md")));
        assert!(!config.is_code_file(Path::new("Makefile")));
    }
}
