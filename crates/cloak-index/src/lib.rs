//! Change-aware code indexing with encrypted-at-rest snapshots and hybrid retrieval.
//!
//! Source files are split into overlapping character windows, annotated with
//! tree-sitter symbol names, embedded, and indexed twice: a flat inner-product
//! index for dense similarity and a BM25 index for exact terms. The four aligned
//! artifacts are sealed with age and published as one generation. Queries fuse
//! both rankings with weighted reciprocal rank fusion.

pub mod chunker;
pub mod dense;
pub mod detector;
pub mod error;
pub mod fusion;
pub mod indexer;
pub mod languages;
pub mod lexical;
pub mod retriever;
pub mod snapshot;
pub mod store;
pub mod vault;
pub mod watcher;

pub use error::{IndexError, Result};
