//! Encrypted, generation-swapped persistence of index snapshots.
//!
//! Layout under the index directory:
//!
//! ```text
//! CURRENT                      name of the live generation
//! snap-<uuid>/documents.json.enc
//! snap-<uuid>/metadatas.json.enc
//! snap-<uuid>/dense.index.enc
//! snap-<uuid>/lexical.index.enc
//! ```
//!
//! A new generation is written into a staging directory, renamed into place,
//! and published by atomically replacing `CURRENT`. Readers resolve `CURRENT`
//! once and read one generation, so they never mix artifacts from two builds.

use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::error::{IndexError, Result};
use crate::snapshot::{Artifact, IndexSnapshot, SnapshotParts};
use crate::vault::IndexKey;

const POINTER_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "snap-";
const STAGING_PREFIX: &str = ".staging-";
const POINTER_TMP_PREFIX: &str = "CURRENT.tmp-";
const STALE_STAGING_AGE: Duration = Duration::from_secs(3600);

/// Outcome of loading the live snapshot.
#[derive(Debug, Clone)]
pub enum SnapshotLoad {
    Ready(Arc<IndexSnapshot>),
    /// Nothing usable has been published; `missing` names what was absent.
    NotBuilt { missing: String },
    /// An artifact exists but failed authentication, decoding, or alignment.
    Corrupt { artifact: String, reason: String },
}

impl SnapshotLoad {
    /// # Errors
    ///
    /// Converts `NotBuilt` and `Corrupt` into the matching [`IndexError`].
    pub fn into_ready(self) -> Result<Arc<IndexSnapshot>> {
        match self {
            Self::Ready(snapshot) => Ok(snapshot),
            Self::NotBuilt { missing } => Err(IndexError::NotBuilt { missing }),
            Self::Corrupt { artifact, reason } => Err(IndexError::Corrupt { artifact, reason }),
        }
    }
}

enum GenerationRead {
    Loaded(IndexSnapshot),
    Missing(String),
    Rejected { artifact: String, reason: String },
}

/// Stores sealed snapshots in one directory with one key.
#[derive(Debug)]
pub struct SecureStore {
    dir: PathBuf,
    key: IndexKey,
    write_lock: Mutex<()>,
}

impl SecureStore {
    /// Open (creating if needed) the index directory and load or generate the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the key is unusable.
    pub fn open(dir: &Path, key_path: &Path) -> Result<Self> {
        let key = IndexKey::load_or_create(key_path)?;
        Self::with_key(dir, key)
    }

    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_key(dir: &Path, key: IndexKey) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self {
            dir: dir.to_path_buf(),
            key,
            write_lock: Mutex::new(()),
        };
        store.remove_plaintext(&store.dir);
        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the live generation, if one has been published.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the pointer exists but cannot be read.
    pub fn current_generation(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(self.dir.join(POINTER_FILE)) {
            Ok(raw) => Ok(Some(raw.trim().to_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Seal `snapshot` as a new generation and make it live.
    ///
    /// On error the previously live generation stays live and untouched.
    ///
    /// # Errors
    ///
    /// Returns `Misaligned` for an inconsistent snapshot, or an IO / vault error
    /// if writing fails.
    pub fn persist(&self, snapshot: IndexSnapshot) -> Result<Arc<IndexSnapshot>> {
        snapshot.check_alignment()?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| IndexError::Other("store write lock poisoned".into()))?;

        let generation = format!("{GENERATION_PREFIX}{}", uuid::Uuid::new_v4().simple());
        let staging = self.dir.join(format!("{STAGING_PREFIX}{generation}"));
        let target = self.dir.join(&generation);

        if let Err(e) = self.write_generation(&staging, &snapshot) {
            discard_dir(&staging);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&staging, &target) {
            discard_dir(&staging);
            return Err(e.into());
        }
        if let Err(e) = self.swap_pointer(&generation) {
            discard_dir(&target);
            return Err(e);
        }
        sync_dir(&self.dir);

        self.prune(&generation);
        tracing::info!(
            generation = %generation,
            chunks = snapshot.len(),
            files = snapshot.file_count(),
            "index snapshot published"
        );
        Ok(Arc::new(snapshot))
    }

    fn write_generation(&self, staging: &Path, snapshot: &IndexSnapshot) -> Result<()> {
        std::fs::create_dir_all(staging)?;
        for artifact in Artifact::ALL {
            let plaintext = snapshot.encode(artifact)?;
            let sealed = self.key.seal(&plaintext)?;
            write_synced(&staging.join(artifact.sealed_name()), &sealed)?;
        }
        sync_dir(staging);
        Ok(())
    }

    fn swap_pointer(&self, generation: &str) -> Result<()> {
        let tmp = self
            .dir
            .join(format!("{POINTER_TMP_PREFIX}{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = write_synced(&tmp, generation.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, self.dir.join(POINTER_FILE)))
        {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Load, authenticate, and validate the live generation.
    ///
    /// # Errors
    ///
    /// Returns `Io` only for unexpected filesystem failures; missing or damaged
    /// artifacts are reported through [`SnapshotLoad`].
    pub fn load_for_query(&self) -> Result<SnapshotLoad> {
        // a concurrent publish can prune the generation we just resolved; retry once
        for _ in 0..2 {
            let Some(generation) = self.current_generation()? else {
                return Ok(SnapshotLoad::NotBuilt {
                    missing: POINTER_FILE.into(),
                });
            };
            if !is_generation_name(&generation) {
                return Ok(SnapshotLoad::Corrupt {
                    artifact: POINTER_FILE.into(),
                    reason: format!("{generation:?} is not a generation name"),
                });
            }

            match self.read_generation(&generation)? {
                GenerationRead::Loaded(snapshot) => {
                    tracing::debug!(generation = %generation, chunks = snapshot.len(), "snapshot loaded");
                    return Ok(SnapshotLoad::Ready(Arc::new(snapshot)));
                }
                GenerationRead::Rejected { artifact, reason } => {
                    tracing::warn!(generation = %generation, artifact = %artifact, "index artifact rejected: {reason}");
                    return Ok(SnapshotLoad::Corrupt { artifact, reason });
                }
                GenerationRead::Missing(missing) => {
                    if self.current_generation()?.as_deref() == Some(generation.as_str()) {
                        return Ok(SnapshotLoad::NotBuilt { missing });
                    }
                }
            }
        }
        Ok(SnapshotLoad::NotBuilt {
            missing: POINTER_FILE.into(),
        })
    }

    fn read_generation(&self, generation: &str) -> Result<GenerationRead> {
        let dir = self.dir.join(generation);
        let mut parts = SnapshotParts::default();
        for artifact in Artifact::ALL {
            let name = artifact.sealed_name();
            let sealed = match std::fs::read(dir.join(&name)) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Ok(GenerationRead::Missing(format!("{generation}/{name}")));
                }
                Err(e) => return Err(e.into()),
            };
            let plaintext = match self.key.open(&sealed) {
                Ok(plaintext) => plaintext,
                Err(e) if e.is_rejected_ciphertext() => {
                    return Ok(GenerationRead::Rejected {
                        artifact: name,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            if let Err(e) = parts.insert(artifact, &plaintext) {
                return Ok(GenerationRead::Rejected {
                    artifact: name,
                    reason: e.to_string(),
                });
            }
        }
        match parts.finish() {
            Ok(snapshot) => Ok(GenerationRead::Loaded(snapshot)),
            Err(e) => Ok(GenerationRead::Rejected {
                artifact: generation.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    /// Remove superseded generations, abandoned staging directories, and
    /// leftover pointer temp files. Failures are logged and ignored.
    fn prune(&self, live: &str) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("cannot list index dir for pruning: {e}");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if is_generation_name(&name) && name != live {
                discard_dir(&path);
            } else if name.starts_with(STAGING_PREFIX) && is_stale(&path) {
                discard_dir(&path);
            } else if name.starts_with(POINTER_TMP_PREFIX) && is_stale(&path) {
                let _ = std::fs::remove_file(&path);
            }
        }
        self.remove_plaintext(&self.dir);
        self.remove_plaintext(&self.dir.join(live));
    }

    /// Delete unencrypted artifact files in `dir`.
    fn remove_plaintext(&self, dir: &Path) {
        for artifact in Artifact::ALL {
            let path = dir.join(artifact.file_name());
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::warn!(path = %path.display(), "removed plaintext index artifact"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), "cannot remove plaintext artifact: {e}"),
            }
        }
    }
}

fn is_generation_name(name: &str) -> bool {
    name.strip_prefix(GENERATION_PREFIX)
        .is_some_and(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_STAGING_AGE)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn sync_dir(dir: &Path) {
    if cfg!(unix)
        && let Ok(handle) = std::fs::File::open(dir)
    {
        let _ = handle.sync_all();
    }
}

fn discard_dir(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path)
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), "cannot remove index directory: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::DenseIndex;
    use crate::lexical::LexicalIndex;
    use crate::snapshot::ChunkMetadata;

    fn snapshot(texts: &[&str]) -> IndexSnapshot {
        let documents: Vec<String> = texts.iter().map(|t| (*t).to_string()).collect();
        let metadatas = (0..documents.len())
            .map(|i| ChunkMetadata {
                source_path: format!("f{i}.py"),
                language: "python".into(),
                symbols: vec![],
                chunk_index: 0,
                total_chunks: 1,
            })
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let vectors: Vec<Vec<f32>> = (0..documents.len()).map(|i| vec![i as f32, 1.0]).collect();
        IndexSnapshot::new(
            documents.clone(),
            metadatas,
            DenseIndex::from_vectors(&vectors).unwrap(),
            LexicalIndex::build(&documents),
        )
        .unwrap()
    }

    fn store(dir: &Path) -> SecureStore {
        SecureStore::open(&dir.join("index"), &dir.join("secret.key")).unwrap()
    }

    fn live_dir(store: &SecureStore) -> PathBuf {
        store.dir().join(store.current_generation().unwrap().unwrap())
    }

    #[test]
    fn empty_store_is_not_built() {
        let tmp = tempfile::tempdir().unwrap();
        match store(tmp.path()).load_for_query().unwrap() {
            SnapshotLoad::NotBuilt { missing } => assert_eq!(missing, "CURRENT"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn persist_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(snapshot(&["alpha beta", "gamma"])).unwrap();
        let loaded = store.load_for_query().unwrap().into_ready().unwrap();
        assert_eq!(loaded.documents, vec!["alpha beta", "gamma"]);
        assert_eq!(loaded.dense.vector(1), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn reopened_store_reads_with_saved_key() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path()).persist(snapshot(&["one"])).unwrap();
        let reopened = store(tmp.path());
        assert_eq!(reopened.load_for_query().unwrap().into_ready().unwrap().len(), 1);
    }

    #[test]
    fn only_sealed_files_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(snapshot(&["needle_token in plain sight"])).unwrap();
        let live = live_dir(&store);
        let mut names: Vec<String> = std::fs::read_dir(&live)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "dense.index.enc",
                "documents.json.enc",
                "lexical.index.enc",
                "metadatas.json.enc"
            ]
        );
        for name in names {
            let bytes = std::fs::read(live.join(name)).unwrap();
            let text = String::from_utf8_lossy(&bytes);
            assert!(!text.contains("needle_token"));
        }
    }

    #[test]
    fn tampered_artifact_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(snapshot(&["alpha", "beta"])).unwrap();
        let path = live_dir(&store).join("metadatas.json.enc");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        std::fs::write(&path, bytes).unwrap();

        match store.load_for_query().unwrap() {
            SnapshotLoad::Corrupt { artifact, .. } => assert_eq!(artifact, "metadatas.json.enc"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn artifact_from_other_key_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(snapshot(&["alpha"])).unwrap();
        let foreign = IndexKey::ephemeral().seal(b"[\"evil\"]").unwrap();
        std::fs::write(live_dir(&store).join("documents.json.enc"), foreign).unwrap();
        assert!(matches!(
            store.load_for_query().unwrap(),
            SnapshotLoad::Corrupt { .. }
        ));
    }

    #[test]
    fn missing_artifact_is_not_built() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(snapshot(&["alpha"])).unwrap();
        std::fs::remove_file(live_dir(&store).join("lexical.index.enc")).unwrap();
        match store.load_for_query().unwrap() {
            SnapshotLoad::NotBuilt { missing } => assert!(missing.ends_with("lexical.index.enc")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn garbage_pointer_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        std::fs::write(store.dir().join("CURRENT"), "../../etc").unwrap();
        assert!(matches!(
            store.load_for_query().unwrap(),
            SnapshotLoad::Corrupt { .. }
        ));
    }

    #[test]
    fn republish_replaces_and_prunes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(snapshot(&["old"])).unwrap();
        let first = store.current_generation().unwrap().unwrap();
        store.persist(snapshot(&["new", "newer"])).unwrap();
        let second = store.current_generation().unwrap().unwrap();

        assert_ne!(first, second);
        assert!(!store.dir().join(&first).exists());
        let loaded = store.load_for_query().unwrap().into_ready().unwrap();
        assert_eq!(loaded.documents, vec!["new", "newer"]);
    }

    #[test]
    fn misaligned_snapshot_not_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(snapshot(&["kept"])).unwrap();
        let mut bad = snapshot(&["a", "b"]);
        bad.metadatas.pop();
        assert!(store.persist(bad).is_err());
        let loaded = store.load_for_query().unwrap().into_ready().unwrap();
        assert_eq!(loaded.documents, vec!["kept"]);
    }

    #[test]
    fn stray_plaintext_removed_on_open() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("documents.json"), "[\"leak\"]").unwrap();
        let _store = store(tmp.path());
        assert!(!dir.join("documents.json").exists());
    }

    #[test]
    fn empty_snapshot_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.persist(IndexSnapshot::default()).unwrap();
        assert!(store.load_for_query().unwrap().into_ready().unwrap().is_empty());
    }

    #[test]
    fn generation_names() {
        assert!(is_generation_name("snap-0a1b"));
        assert!(!is_generation_name("snap-"));
        assert!(!is_generation_name("snap-../x"));
        assert!(!is_generation_name("CURRENT"));
    }
}
