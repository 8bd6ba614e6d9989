//! Corpus index over canonical articles.
//!
//! # Responsibility
//! - Maintain the SQLite FTS5 representation of every NEW article.
//! - Score candidate text against it with field-weighted BM25.
//!
//! # Invariants
//! - Only canonical articles are indexed; duplicates and update
//!   candidates never reach the index.
//! - Rebuilds drop and recreate the virtual tables, then bulk reload.

pub mod index;
pub mod scoring;
pub mod tokens;
