use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cloak_llm::provider::EmbedProvider;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;

use crate::detector::METADATA_FILE;
use crate::error::Result;
use crate::indexer::{CodeIndexer, IndexOutcome, IndexerConfig};
use crate::store::SecureStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Re-runs [`CodeIndexer::incremental_index`] whenever source files or VCS
/// refs under the tree change. Bursts of events collapse into one run once
/// the tree has been quiet for the debounce period.
///
/// Watching stops when the value is dropped.
pub struct IndexWatcher {
    _watcher: RecommendedWatcher,
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start<P: EmbedProvider + 'static>(
        root: &Path,
        indexer: Arc<CodeIndexer<P>>,
        store: Arc<SecureStore>,
        debounce: Duration,
    ) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(1);

        // events carry paths under the watched path, so watch the same form the filter compares against
        let root = canonical(root);
        let filter = ChangeFilter::new(&root, store.dir(), indexer.config());
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("index watcher error: {e}");
                    return;
                }
            };
            if is_content_change(&event.kind) && event.paths.iter().any(|p| filter.is_relevant(p)) {
                // a full channel already holds a pending rebuild
                let _ = notify_tx.try_send(());
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        tracing::info!(tree = %root.display(), "watching for changes");
        let handle = tokio::spawn(async move {
            while notify_rx.recv().await.is_some() {
                // wait for a quiet period before rebuilding
                loop {
                    match tokio::time::timeout(debounce, notify_rx.recv()).await {
                        Ok(Some(())) => {}
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                match indexer.incremental_index(&root, &store).await {
                    Ok(IndexOutcome::UpToDate { .. }) => {
                        tracing::debug!(tree = %root.display(), "change ignored, revision unchanged");
                    }
                    Ok(IndexOutcome::Rebuilt(report)) => {
                        tracing::info!(tree = %root.display(), chunks = report.chunks_created, "watcher rebuilt index");
                    }
                    Err(e) => tracing::warn!(tree = %root.display(), "watcher rebuild failed: {e}"),
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            handle,
        })
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Reads and attribute changes never alter what gets indexed.
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(modify) => !matches!(modify, ModifyKind::Metadata(_)),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => false,
    }
}

/// Decides which changed paths can affect the index.
struct ChangeFilter {
    root: PathBuf,
    index_dir: PathBuf,
    config: IndexerConfig,
}

impl ChangeFilter {
    fn new(root: &Path, index_dir: &Path, config: &IndexerConfig) -> Self {
        Self {
            root: canonical(root),
            index_dir: canonical(index_dir),
            config: config.clone(),
        }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if path.starts_with(&self.index_dir) {
            return false;
        }
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(METADATA_FILE))
        {
            return false;
        }
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        if let Ok(git) = rel.strip_prefix(".git") {
            return git == Path::new("HEAD")
                || git == Path::new("packed-refs")
                || git.starts_with("refs");
        }
        let excluded = rel.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            self.config.exclude_dirs.iter().any(|d| *d == name)
        });
        !excluded && self.config.is_code_file(path)
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
