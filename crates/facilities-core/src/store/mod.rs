//! Storage abstraction for Facilities Drafter.
//!
//! The [`VectorIndex`] trait defines every operation the ingestion pipeline,
//! retriever and analyzer need from a persistent chunk store, enabling
//! pluggable backends (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::{Chunk, CorpusSummary, RetrievedChunk};

/// Abstract vector index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorIndex::add) | Append chunks (with embeddings) |
/// | [`query`](VectorIndex::query) | k-nearest chunks by cosine similarity |
/// | [`list_sources`](VectorIndex::list_sources) | Distinct `source_file` values |
/// | [`list_source_paths`](VectorIndex::list_source_paths) | Distinct `source_path` values |
/// | [`count`](VectorIndex::count) | Number of stored chunks |
/// | [`summary`](VectorIndex::summary) | Chunk/source counts for a category slice |
///
/// `add` is append-only: stored chunks are never re-embedded or rewritten.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Append chunks. Every chunk must carry an embedding whose length
    /// matches the vectors already stored.
    async fn add(&self, chunks: &[Chunk]) -> Result<()>;

    /// Return up to `k` chunks ordered by descending similarity to
    /// `embedding`. Ties keep insertion order.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>>;

    async fn list_sources(&self) -> Result<BTreeSet<String>>;

    async fn list_source_paths(&self) -> Result<BTreeSet<String>>;

    async fn count(&self) -> Result<usize>;

    /// Counts restricted to chunks whose tag contains any of `tag_filter`
    /// (substring match), or the whole index when `None`.
    async fn summary(&self, tag_filter: Option<&[String]>) -> Result<CorpusSummary>;
}

/// Check a batch before it is written.
///
/// `existing_dims` is the dimensionality already recorded by the index, if
/// any. Returns the dimensionality of the batch (or `existing_dims` for an
/// empty batch).
pub fn check_batch_dims(
    chunks: &[Chunk],
    existing_dims: Option<usize>,
) -> Result<Option<usize>, IndexError> {
    let mut expected = existing_dims;
    for c in chunks {
        if c.embedding.is_empty() {
            return Err(IndexError::EmptyEmbedding(c.source_file.clone()));
        }
        match expected {
            Some(dims) if dims != c.embedding.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    actual: c.embedding.len(),
                });
            }
            Some(_) => {}
            None => expected = Some(c.embedding.len()),
        }
    }
    Ok(expected)
}

/// Brute-force ranking shared by the shipped indexes.
///
/// Scores each chunk against `query_vec`, sorts descending with a stable
/// sort (so equal scores keep iteration order) and truncates to `k`.
pub fn rank_by_similarity<I>(query_vec: &[f32], chunks: I, k: usize) -> Vec<RetrievedChunk>
where
    I: IntoIterator<Item = Chunk>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<RetrievedChunk> = chunks
        .into_iter()
        .map(|chunk| RetrievedChunk {
            score: cosine_similarity(query_vec, &chunk.embedding),
            chunk,
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Build a [`CorpusSummary`] from `(source_file, category_tag)` pairs.
pub fn summarize<'a, I>(rows: I, tag_filter: Option<&[String]>) -> CorpusSummary
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut total_chunks = 0;
    let mut sources = BTreeSet::new();
    for (source, tag) in rows {
        let keep = match tag_filter {
            Some(filter) => filter.iter().any(|f| tag.contains(f.as_str())),
            None => true,
        };
        if keep {
            total_chunks += 1;
            sources.insert(source);
        }
    }
    CorpusSummary {
        total_chunks,
        unique_sources: sources.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            text: format!("text of {}", source),
            source_file: source.to_string(),
            source_path: source.to_string(),
            page_or_offset: 0,
            category_tag: String::new(),
            embedding,
        }
    }

    #[test]
    fn batch_dims_first_write_sets_dimension() {
        let batch = vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.0, 1.0])];
        assert_eq!(check_batch_dims(&batch, None).unwrap(), Some(2));
    }

    #[test]
    fn batch_dims_rejects_mismatch() {
        let batch = vec![chunk("a", vec![1.0, 0.0, 0.0])];
        let err = check_batch_dims(&batch, Some(2)).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn batch_dims_rejects_mixed_batch() {
        let batch = vec![chunk("a", vec![1.0]), chunk("b", vec![1.0, 2.0])];
        assert!(check_batch_dims(&batch, None).is_err());
    }

    #[test]
    fn batch_dims_rejects_empty_embedding() {
        let batch = vec![chunk("a", vec![])];
        assert!(matches!(
            check_batch_dims(&batch, None),
            Err(IndexError::EmptyEmbedding(_))
        ));
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let chunks = vec![
            chunk("low", vec![0.0, 1.0]),
            chunk("tie1", vec![1.0, 0.0]),
            chunk("tie2", vec![2.0, 0.0]),
        ];
        let ranked = rank_by_similarity(&[1.0, 0.0], chunks, 3);
        let order: Vec<&str> = ranked.iter().map(|r| r.chunk.source_file.as_str()).collect();
        assert_eq!(order, vec!["tie1", "tie2", "low"]);
    }

    #[test]
    fn ranking_zero_k_is_empty() {
        assert!(rank_by_similarity(&[1.0], vec![chunk("a", vec![1.0])], 0).is_empty());
    }

    #[test]
    fn summarize_filters_by_substring() {
        let rows = vec![("a.pdf", "NSF"), ("a.pdf", "NSF"), ("b.pdf", "NIH"), ("c.pdf", "NSF-CISE")];
        let all = summarize(rows.clone(), None);
        assert_eq!(all.total_chunks, 4);
        assert_eq!(all.unique_sources, 3);
        let nsf = summarize(rows, Some(&["NSF".to_string()]));
        assert_eq!(nsf.total_chunks, 3);
        assert_eq!(nsf.unique_sources, 2);
    }
}
