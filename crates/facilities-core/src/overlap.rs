//! Semantic overlap and source diversity of a single retrieval.
//!
//! High overlap means the retrieved chunks say much the same thing; low
//! diversity means they come from few documents. Both are percentages
//! rounded to two decimals.

use std::collections::{BTreeMap, BTreeSet};

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::ProviderError;
use crate::models::{round2, OverlapReport, RetrievalResult};

/// Mean off-diagonal cosine similarity of `vectors`, ×100.
///
/// Fewer than two vectors score 0.
pub fn overlap_of(vectors: &[Vec<f32>]) -> f64 {
    let n = vectors.len();
    if n < 2 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                sum += cosine_similarity(&vectors[i], &vectors[j]) as f64;
            }
        }
    }
    round2(100.0 * sum / (n * (n - 1)) as f64)
}

/// Embed every chunk of `result` and compute [`overlap_of`].
pub async fn semantic_overlap(
    result: &RetrievalResult,
    embedder: &dyn Embedder,
) -> Result<f64, ProviderError> {
    if result.len() < 2 {
        return Ok(0.0);
    }
    let vectors = embedder.embed_batch(&result.texts()).await?;
    Ok(overlap_of(&vectors))
}

/// Distinct sources over total chunks, ×100. An empty result scores 0.
pub fn source_diversity(sources: &[String]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let unique: BTreeSet<&String> = sources.iter().collect();
    round2(100.0 * unique.len() as f64 / sources.len() as f64)
}

/// Build an [`OverlapReport`] for one retrieval. A provider failure scores
/// the overlap 0 and is logged.
pub async fn measure_overlap(result: &RetrievalResult, embedder: &dyn Embedder) -> OverlapReport {
    let sources = result.sources();
    let mut distribution = BTreeMap::new();
    for s in &sources {
        *distribution.entry(s.clone()).or_insert(0usize) += 1;
    }

    let overlap = match semantic_overlap(result, embedder).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(query = %result.query, error = %e, "semantic overlap failed; scoring 0");
            0.0
        }
    };

    OverlapReport {
        retrieved_count: result.len(),
        unique_sources: distribution.len(),
        semantic_overlap: overlap,
        source_diversity: source_diversity(&sources),
        sources,
        source_distribution: distribution,
    }
}
