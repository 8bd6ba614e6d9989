//! Field-weighted BM25 (BM25F) used to re-score FTS hits.
//!
//! FTS5's built-in `bm25()` clamps IDF to ~0 whenever a term appears in at
//! least half of the rows, which makes raw ranks meaningless for small
//! corpora. Re-scoring uses the non-negative IDF `ln(1 + (N - n + 0.5) / (n + 0.5))`
//! and reports similarity relative to the candidate's self-match, so a
//! fixed threshold keeps its meaning as the corpus grows.

use crate::config::IndexSettings;
use crate::search::tokens::tokenize;
use std::collections::HashMap;

/// Headline, summary, body.
pub const FIELD_COUNT: usize = 3;

/// Token statistics of one document, per field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDocument {
    term_counts: HashMap<String, [u32; FIELD_COUNT]>,
    lengths: [u32; FIELD_COUNT],
}

impl FieldDocument {
    pub fn from_fields(headline: &str, summary: &str, body: &str) -> Self {
        let mut document = Self::default();
        for (field, text) in [headline, summary, body].into_iter().enumerate() {
            for token in tokenize(text) {
                document.term_counts.entry(token).or_insert([0; FIELD_COUNT])[field] += 1;
                document.lengths[field] += 1;
            }
        }
        document
    }

    pub fn lengths(&self) -> [u32; FIELD_COUNT] {
        self.lengths
    }

    pub fn term_frequencies(&self, term: &str) -> [u32; FIELD_COUNT] {
        self.term_counts
            .get(term)
            .copied()
            .unwrap_or([0; FIELD_COUNT])
    }
}

/// Corpus-wide counts persisted in `corpus_index_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub doc_count: u64,
    pub total_lengths: [u64; FIELD_COUNT],
}

impl CorpusStats {
    pub fn average_lengths(&self) -> [f64; FIELD_COUNT] {
        if self.doc_count == 0 {
            return [0.0; FIELD_COUNT];
        }
        let docs = self.doc_count as f64;
        self.total_lengths.map(|total| total as f64 / docs)
    }
}

/// BM25F parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25f {
    weights: [f64; FIELD_COUNT],
    k1: f64,
    b: f64,
}

impl Bm25f {
    pub fn new(weights: [f64; FIELD_COUNT], k1: f64, b: f64) -> Self {
        Self { weights, k1, b }
    }

    pub fn from_settings(settings: &IndexSettings) -> Self {
        Self::new(
            [
                settings.headline_weight,
                settings.summary_weight,
                settings.body_weight,
            ],
            settings.k1,
            settings.b,
        )
    }

    pub fn weights(&self) -> [f64; FIELD_COUNT] {
        self.weights
    }

    /// Non-negative inverse document frequency.
    pub fn idf(doc_count: u64, doc_freq: u64) -> f64 {
        let n = doc_freq.min(doc_count) as f64;
        let total = doc_count as f64;
        ((total - n + 0.5) / (n + 0.5)).ln_1p()
    }

    /// Scores `document` for `terms`. Terms missing from `idfs` contribute 0.
    pub fn score(
        &self,
        terms: &[String],
        document: &FieldDocument,
        average_lengths: &[f64; FIELD_COUNT],
        idfs: &HashMap<String, f64>,
    ) -> f64 {
        let lengths = document.lengths();
        let norms: [f64; FIELD_COUNT] = std::array::from_fn(|field| {
            let average = average_lengths[field];
            if average <= 0.0 {
                1.0
            } else {
                1.0 - self.b + self.b * f64::from(lengths[field]) / average
            }
        });

        terms
            .iter()
            .map(|term| {
                let Some(idf) = idfs.get(term) else {
                    return 0.0;
                };
                let frequencies = document.term_frequencies(term);
                let weighted: f64 = (0..FIELD_COUNT)
                    .map(|field| self.weights[field] * f64::from(frequencies[field]) / norms[field])
                    .sum();
                if weighted <= 0.0 {
                    return 0.0;
                }
                idf * weighted * (self.k1 + 1.0) / (weighted + self.k1)
            })
            .sum()
    }
}

/// Converts a document score into the engine's similarity convention.
///
/// `0.0` means nothing shared; `-1.0` means the document scores exactly
/// like the candidate's own text. More negative is a stronger match.
pub fn relative_score(document_score: f64, self_score: f64) -> f64 {
    if self_score <= 0.0 || document_score <= 0.0 {
        return 0.0;
    }
    -(document_score / self_score)
}
