//! Revision tracking that decides whether a tree needs re-indexing.

use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// File written at the root of an indexed tree.
pub const METADATA_FILE: &str = ".cloak_metadata.json";

/// What the version-control system says about a tree right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    Commit(String),
    /// Not a repository, or the VCS could not be queried.
    Untracked,
}

impl Revision {
    #[must_use]
    pub fn as_commit(&self) -> Option<&str> {
        match self {
            Self::Commit(id) => Some(id),
            Self::Untracked => None,
        }
    }
}

/// Source of the current commit identifier for a tree.
pub trait RevisionSource: Send + Sync {
    /// Current commit id, or `None` when it cannot be determined.
    fn current_commit(&self, tree: &Path) -> Option<String>;
}

/// Asks `git rev-parse HEAD` inside the tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRevisionSource;

impl RevisionSource for GitRevisionSource {
    fn current_commit(&self, tree: &Path) -> Option<String> {
        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(tree)
            .args(["rev-parse", "HEAD"])
            .output()
            .map_err(|e| tracing::debug!("git unavailable: {e}"))
            .ok()?;
        if !output.status.success() {
            tracing::debug!(tree = %tree.display(), "git rev-parse HEAD failed");
            return None;
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!id.is_empty()).then_some(id)
    }
}

#[must_use]
pub fn observe(source: &dyn RevisionSource, tree: &Path) -> Revision {
    source
        .current_commit(tree)
        .map_or(Revision::Untracked, Revision::Commit)
}

/// A rebuild is needed unless the tree is tracked and its commit equals the
/// one recorded at the last successful build.
#[must_use]
pub fn needs_rebuild(recorded: Option<&str>, observed: &Revision) -> bool {
    match (recorded, observed) {
        (Some(last), Revision::Commit(now)) => last != now,
        _ => true,
    }
}

/// Revision recorded after the last successful build of a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub last_commit: Option<String>,
}

impl TreeMetadata {
    #[must_use]
    pub fn path_for(tree: &Path) -> PathBuf {
        tree.join(METADATA_FILE)
    }

    /// Read the record for `tree`. A missing or unreadable record yields the
    /// empty record, which always forces a rebuild.
    ///
    /// # Errors
    ///
    /// Returns `Io` only if the file exists but cannot be read.
    pub fn load(tree: &Path) -> Result<Self> {
        let path = Self::path_for(tree);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Ok(meta),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unparseable index metadata: {e}");
                Ok(Self::default())
            }
        }
    }

    /// Atomically replace the record for `tree`.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Json` if the record cannot be written.
    pub fn save(&self, tree: &Path) -> Result<()> {
        let path = Self::path_for(tree);
        let tmp = tree.join(format!(
            "{METADATA_FILE}.tmp-{}",
            uuid::Uuid::new_v4().simple()
        ));
        let json = serde_json::to_vec_pretty(self)?;
        let written = std::fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(&json)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| std::fs::rename(&tmp, &path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
