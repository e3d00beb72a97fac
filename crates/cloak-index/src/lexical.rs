//! Okapi BM25 over whitespace-separated tokens.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;

/// Splits on Unicode whitespace; no case folding or stemming.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

/// Term statistics for a fixed corpus. Document ids are positions in the
/// corpus passed to [`LexicalIndex::build`].
///
/// Only the integer term frequencies and the two tuning constants are
/// serialized; corpus statistics are recomputed on load so a decoded index
/// scores bit-for-bit like the one that was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredLexical", from = "StoredLexical")]
pub struct LexicalIndex {
    k1: f64,
    b: f64,
    avgdl: f64,
    doc_lens: Vec<usize>,
    term_freqs: Vec<BTreeMap<String, u32>>,
    idf: BTreeMap<String, f64>,
}

#[derive(Serialize, Deserialize)]
struct StoredLexical {
    k1: f64,
    b: f64,
    term_freqs: Vec<BTreeMap<String, u32>>,
}

impl From<LexicalIndex> for StoredLexical {
    fn from(index: LexicalIndex) -> Self {
        Self {
            k1: index.k1,
            b: index.b,
            term_freqs: index.term_freqs,
        }
    }
}

impl From<StoredLexical> for LexicalIndex {
    fn from(stored: StoredLexical) -> Self {
        Self::from_term_freqs(stored.term_freqs, stored.k1, stored.b)
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::build::<&str>(&[])
    }
}

impl LexicalIndex {
    #[must_use]
    pub fn build<S: AsRef<str>>(documents: &[S]) -> Self {
        Self::with_params(documents, DEFAULT_K1, DEFAULT_B)
    }

    #[must_use]
    pub fn with_params<S: AsRef<str>>(documents: &[S], k1: f64, b: f64) -> Self {
        let term_freqs = documents
            .iter()
            .map(|doc| {
                let mut freqs: BTreeMap<String, u32> = BTreeMap::new();
                for token in tokenize(doc.as_ref()) {
                    *freqs.entry(token.to_owned()).or_insert(0) += 1;
                }
                freqs
            })
            .collect();
        Self::from_term_freqs(term_freqs, k1, b)
    }

    fn from_term_freqs(term_freqs: Vec<BTreeMap<String, u32>>, k1: f64, b: f64) -> Self {
        let mut doc_freq: BTreeMap<&str, usize> = BTreeMap::new();
        let mut doc_lens = Vec::with_capacity(term_freqs.len());
        for freqs in &term_freqs {
            for term in freqs.keys() {
                *doc_freq.entry(term.as_str()).or_insert(0) += 1;
            }
            doc_lens.push(freqs.values().map(|&tf| tf as usize).sum());
        }

        #[allow(clippy::cast_precision_loss)]
        let n = term_freqs.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let avgdl = if term_freqs.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / n
        };
        #[allow(clippy::cast_precision_loss)]
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                (term.to_owned(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        Self {
            k1,
            b,
            avgdl,
            doc_lens,
            term_freqs,
            idf,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Token count of document `id`.
    #[must_use]
    pub fn doc_len(&self, id: usize) -> Option<usize> {
        self.doc_lens.get(id).copied()
    }

    /// BM25 score of every document against `query`. Repeated query tokens
    /// contribute once per occurrence.
    #[must_use]
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0; self.len()];
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };

        for token in tokenize(query) {
            let Some(&idf) = self.idf.get(token) else {
                continue;
            };
            for (id, freqs) in self.term_freqs.iter().enumerate() {
                let Some(&tf) = freqs.get(token) else {
                    continue;
                };
                let tf = f64::from(tf);
                #[allow(clippy::cast_precision_loss)]
                let norm = 1.0 - self.b + self.b * self.doc_lens[id] as f64 / avgdl;
                scores[id] += idf * tf * (self.k1 + 1.0) / (tf + self.k1 * norm);
            }
        }
        scores
    }

    /// Up to `k` documents with a positive score, best first. Equal scores are
    /// ordered by lower id.
    ///
    /// Documents sharing no term with the query are left out rather than
    /// padding the ranking with arbitrary zero-score entries, so the lexical
    /// list may be shorter than `k`; fusion then only credits real matches.
    #[must_use]
    pub fn search(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        let mut hits: Vec<(usize, f64)> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .collect();
        hits.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> LexicalIndex {
        LexicalIndex::build(&[
            "def parse_config ( path ) : return load ( path )",
            "class Renderer : def draw ( self ) : pass",
            "parse_config parse_config parse_config",
            "",
        ])
    }

    #[test]
    fn exact_term_ranks_matching_docs() {
        let hits = corpus().search("parse_config", 10);
        let ids: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(ids, vec![2, 0]);
    }

    #[test]
    fn unknown_terms_score_nothing() {
        assert!(corpus().search("nonexistent", 10).is_empty());
        assert!(corpus().search("", 10).is_empty());
    }

    #[test]
    fn tokenization_is_case_sensitive() {
        assert!(corpus().search("renderer", 10).is_empty());
        assert_eq!(corpus().search("Renderer", 10)[0].0, 1);
    }

    #[test]
    fn term_in_every_document_still_scores() {
        let idx = LexicalIndex::build(&["fn a", "fn b"]);
        let hits = idx.search("fn", 10);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.1 > 0.0));
        assert_eq!(hits[0].0, 0);
    }

    #[test]
    fn truncates_to_k() {
        assert_eq!(corpus().search("parse_config def", 1).len(), 1);
    }

    #[test]
    fn empty_corpus() {
        let idx = LexicalIndex::default();
        assert!(idx.is_empty());
        assert!(idx.search("anything", 5).is_empty());
    }

    #[test]
    fn doc_lengths_match_token_counts() {
        let idx = corpus();
        assert_eq!(idx.doc_len(2), Some(3));
        assert_eq!(idx.doc_len(3), Some(0));
        assert_eq!(idx.doc_len(4), None);
    }

    #[test]
    fn serde_roundtrip_preserves_scores() {
        let idx = corpus();
        let json = serde_json::to_vec(&idx).unwrap();
        let back: LexicalIndex = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.scores("parse_config path"), idx.scores("parse_config path"));
    }
}
