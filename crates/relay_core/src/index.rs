//! Similarity math and ranking shared by the in-memory index.
//!
//! The Postgres adapter pushes the same ordering into SQL (`embedding <=>`
//! with a similarity floor); this module is the reference semantics both
//! implementations must agree on.

use crate::error::{RelayError, Result};
use crate::types::{IndexEntry, SearchMatch};

/// Cosine similarity between two vectors. Zero-norm inputs score 0.0 rather
/// than NaN so they can never outrank a real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank entries against a search vector: descending similarity, truncated at
/// `min_similarity`, ties broken most-recent-first, capped at `top_k`.
/// Entries with a mismatched dimension are skipped.
pub fn rank_matches<'a, I>(
    entries: I,
    vector: &[f32],
    top_k: usize,
    min_similarity: f32,
) -> Vec<SearchMatch>
where
    I: IntoIterator<Item = &'a IndexEntry>,
{
    let mut scored: Vec<(&IndexEntry, f32)> = entries
        .into_iter()
        .filter(|e| e.embedding.len() == vector.len())
        .map(|e| (e, cosine_similarity(&e.embedding, vector)))
        .filter(|(_, sim)| *sim >= min_similarity)
        .collect();

    scored.sort_by(|(ea, sa), (eb, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| eb.created_at.cmp(&ea.created_at))
    });

    scored
        .into_iter()
        .take(top_k)
        .map(|(e, similarity)| SearchMatch {
            answer_id: e.id,
            query_id: e.query_id,
            answer_text: e.answer_text.clone(),
            similarity,
        })
        .collect()
}

/// Reject vectors that do not match the configured index dimension.
pub fn ensure_dimension(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.is_empty() {
        return Err(RelayError::Validation("query_vector must not be empty".into()));
    }
    if vector.len() != dimension {
        return Err(RelayError::Validation(format!(
            "query_vector has dimension {}, index expects {}",
            vector.len(),
            dimension
        )));
    }
    Ok(())
}

/// Truncate to a character budget without splitting a code point.
pub fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
