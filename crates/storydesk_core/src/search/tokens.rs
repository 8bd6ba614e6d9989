//! Tokenization shared by indexing statistics and query building.
//!
//! Mirrors the `unicode61 remove_diacritics 0` FTS5 tokenizer: runs of
//! letters/digits, lowercased.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex"));

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "against", "all", "also", "an", "and", "are", "as", "at", "be",
    "been", "before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "had",
    "has", "have", "he", "her", "his", "how", "if", "in", "into", "is", "it", "its", "may",
    "more", "new", "not", "of", "on", "or", "our", "over", "said", "says", "she", "so", "some",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "to", "under", "up", "was", "we", "were", "what", "when", "which", "while", "who", "will",
    "with", "would", "you",
];

static STOP_WORD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| STOP_WORDS.iter().copied().collect());

/// Splits text into lowercase index tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|token| token.as_str().to_lowercase())
        .collect()
}

pub fn is_stop_word(term: &str) -> bool {
    STOP_WORD_SET.contains(term)
}

/// Distinct, stop-word-free query terms from headline then summary.
///
/// Headline terms come first so the cap drops summary tail terms. When
/// headline and summary hold only stop words, body terms are used instead,
/// and failing that the stop words themselves.
pub fn query_terms(headline: &str, summary: &str, body: &str, max_terms: usize) -> Vec<String> {
    let lead = || tokenize(headline).into_iter().chain(tokenize(summary));
    let terms = collect_terms(lead(), max_terms, false);
    if !terms.is_empty() {
        return terms;
    }
    let terms = collect_terms(tokenize(body).into_iter(), max_terms, false);
    if !terms.is_empty() {
        return terms;
    }
    collect_terms(lead(), max_terms, true)
}

fn collect_terms(
    tokens: impl Iterator<Item = String>,
    max_terms: usize,
    keep_stop_words: bool,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for term in tokens {
        if terms.len() >= max_terms {
            break;
        }
        if (!keep_stop_words && is_stop_word(&term)) || !seen.insert(term.clone()) {
            continue;
        }
        terms.push(term);
    }
    terms
}

/// Builds an FTS5 `MATCH` expression that hits any of the terms.
///
/// Returns `None` when there is nothing to search for.
pub fn match_expression(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|term| escape_fts_term(term))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn escape_fts_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"")
}
