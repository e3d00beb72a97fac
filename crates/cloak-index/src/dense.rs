//! Flat inner-product vector index.
//!
//! Vectors are stored row-major in one contiguous buffer and scanned exhaustively.
//! With unit-length inputs the inner product equals cosine similarity.

use crate::error::{IndexError, Result};

const MAGIC: &[u8; 4] = b"CLKD";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseIndex {
    dim: usize,
    len: usize,
    data: Vec<f32>,
}

impl DenseIndex {
    /// Build an index whose ids are the positions of `vectors`.
    ///
    /// # Errors
    ///
    /// Returns `Embedding` if the vectors do not all share one non-zero length.
    pub fn from_vectors(vectors: &[Vec<f32>]) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Ok(Self::default());
        };
        let dim = first.len();
        if dim == 0 {
            return Err(IndexError::Embedding("embedding has zero dimensions".into()));
        }
        let mut data = Vec::with_capacity(dim * vectors.len());
        for (id, vector) in vectors.iter().enumerate() {
            if vector.len() != dim {
                return Err(IndexError::Embedding(format!(
                    "vector {id} has {} dimensions, expected {dim}",
                    vector.len()
                )));
            }
            data.extend_from_slice(vector);
        }
        Ok(Self {
            dim,
            len: vectors.len(),
            data,
        })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn vector(&self, id: usize) -> Option<&[f32]> {
        if id >= self.len {
            return None;
        }
        self.data.get(id * self.dim..(id + 1) * self.dim)
    }

    /// The `k` ids with the highest inner product against `query`, best first.
    /// Equal scores are ordered by lower id.
    ///
    /// # Errors
    ///
    /// Returns `Embedding` if `query` does not match the index dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(IndexError::Embedding(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                self.dim
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dim)
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum::<f32>())
            .enumerate()
            .collect();

        let by_rank = |a: &(usize, f32), b: &(usize, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_rank);
        Ok(scored)
    }

    /// Serialize to a compact little-endian binary layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&(self.dim as u64).to_le_bytes());
        out.extend_from_slice(&(self.len as u64).to_le_bytes());
        for x in &self.data {
            out.extend_from_slice(&x.to_le_bytes());
        }
        out
    }

    /// # Errors
    ///
    /// Returns `Decode` if the header or payload length is inconsistent.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(IndexError::Decode("dense index header missing".into()));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(IndexError::Decode(format!(
                "unsupported dense index version {}",
                bytes[4]
            )));
        }
        let dim = read_u64(&bytes[5..13])?;
        let len = read_u64(&bytes[13..21])?;
        let payload = &bytes[HEADER_LEN..];
        let expected = dim
            .checked_mul(len)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Decode("dense index size overflows".into()))?;
        if payload.len() != expected || (len > 0 && dim == 0) {
            return Err(IndexError::Decode(format!(
                "dense payload is {} bytes, header implies {expected}",
                payload.len()
            )));
        }
        let data = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self { dim, len, data })
    }
}

fn read_u64(bytes: &[u8]) -> Result<usize> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| IndexError::Decode("truncated dense header".into()))?;
    usize::try_from(u64::from_le_bytes(raw))
        .map_err(|_| IndexError::Decode("dense header value out of range".into()))
}
