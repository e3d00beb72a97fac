//! The four position-aligned components of a built index.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dense::DenseIndex;
use crate::error::{IndexError, Result};
use crate::lexical::{LexicalIndex, tokenize};

/// Per-chunk metadata stored alongside the chunk text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub language: String,
    pub symbols: Vec<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// One persisted component of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Documents,
    Metadatas,
    Dense,
    Lexical,
}

impl Artifact {
    pub const ALL: [Self; 4] = [Self::Documents, Self::Metadatas, Self::Dense, Self::Lexical];

    /// Name of the plaintext form. Only ever used to detect and remove stray files.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Documents => "documents.json",
            Self::Metadatas => "metadatas.json",
            Self::Dense => "dense.index",
            Self::Lexical => "lexical.index",
        }
    }

    /// Name of the sealed file on disk.
    #[must_use]
    pub fn sealed_name(self) -> String {
        format!("{}.enc", self.file_name())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Chunk texts, metadata, dense vectors, and lexical statistics for one build.
/// Position `i` in every component describes the same chunk.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub documents: Vec<String>,
    pub metadatas: Vec<ChunkMetadata>,
    pub dense: DenseIndex,
    pub lexical: LexicalIndex,
}

impl IndexSnapshot {
    /// # Errors
    ///
    /// Returns `Misaligned` if the components disagree.
    pub fn new(
        documents: Vec<String>,
        metadatas: Vec<ChunkMetadata>,
        dense: DenseIndex,
        lexical: LexicalIndex,
    ) -> Result<Self> {
        let snapshot = Self {
            documents,
            metadatas,
            dense,
            lexical,
        };
        snapshot.check_alignment()?;
        Ok(snapshot)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of distinct source files represented.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.metadatas
            .iter()
            .map(|m| m.source_path.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Verify that all four components have one entry per chunk and that the
    /// lexical statistics were computed from these exact texts.
    ///
    /// # Errors
    ///
    /// Returns `Misaligned` describing the first disagreement found.
    pub fn check_alignment(&self) -> Result<()> {
        let n = self.documents.len();
        let counts = [
            ("metadatas", self.metadatas.len()),
            ("dense", self.dense.len()),
            ("lexical", self.lexical.len()),
        ];
        for (name, count) in counts {
            if count != n {
                return Err(IndexError::Misaligned(format!(
                    "{n} documents but {count} {name} entries"
                )));
            }
        }
        for (id, (doc, meta)) in self.documents.iter().zip(&self.metadatas).enumerate() {
            if self.lexical.doc_len(id) != Some(tokenize(doc).count()) {
                return Err(IndexError::Misaligned(format!(
                    "lexical statistics for chunk {id} do not match its text"
                )));
            }
            if meta.chunk_index >= meta.total_chunks {
                return Err(IndexError::Misaligned(format!(
                    "chunk {id} claims index {} of {}",
                    meta.chunk_index, meta.total_chunks
                )));
            }
        }
        Ok(())
    }

    /// Plaintext encoding of one component.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn encode(&self, artifact: Artifact) -> Result<Vec<u8>> {
        Ok(match artifact {
            Artifact::Documents => serde_json::to_vec(&self.documents)?,
            Artifact::Metadatas => serde_json::to_vec(&self.metadatas)?,
            Artifact::Dense => self.dense.to_bytes(),
            Artifact::Lexical => serde_json::to_vec(&self.lexical)?,
        })
    }
}

/// Collects decoded components until all four are present.
#[derive(Debug, Default)]
pub struct SnapshotParts {
    documents: Option<Vec<String>>,
    metadatas: Option<Vec<ChunkMetadata>>,
    dense: Option<DenseIndex>,
    lexical: Option<LexicalIndex>,
}

impl SnapshotParts {
    /// Decode `bytes` as `artifact` and keep it.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the bytes are not a valid encoding of that artifact.
    pub fn insert(&mut self, artifact: Artifact, bytes: &[u8]) -> Result<()> {
        let decode = |e: serde_json::Error| IndexError::Decode(format!("{artifact}: {e}"));
        match artifact {
            Artifact::Documents => {
                self.documents = Some(serde_json::from_slice(bytes).map_err(decode)?);
            }
            Artifact::Metadatas => {
                self.metadatas = Some(serde_json::from_slice(bytes).map_err(decode)?);
            }
            Artifact::Dense => self.dense = Some(DenseIndex::from_bytes(bytes)?),
            Artifact::Lexical => {
                self.lexical = Some(serde_json::from_slice(bytes).map_err(decode)?);
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `Decode` if a component is missing, or `Misaligned` if the
    /// components disagree.
    pub fn finish(self) -> Result<IndexSnapshot> {
        let missing = |a: Artifact| IndexError::Decode(format!("{a} was never decoded"));
        IndexSnapshot::new(
            self.documents.ok_or_else(|| missing(Artifact::Documents))?,
            self.metadatas.ok_or_else(|| missing(Artifact::Metadatas))?,
            self.dense.ok_or_else(|| missing(Artifact::Dense))?,
            self.lexical.ok_or_else(|| missing(Artifact::Lexical))?,
        )
    }
}
