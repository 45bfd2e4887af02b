//! Retrieval drift: how stable are results when the same query is repeated?
//!
//! [`measure_stability`] runs a query `num_runs` times and compares every
//! unordered pair of non-empty runs on three axes:
//!
//! | Metric | Compared per run |
//! |--------|------------------|
//! | ID stability | Jaccard over synthetic chunk ids |
//! | Source stability | Jaccard over distinct `source_file`s |
//! | Content stability | Mean cosine similarity between the runs' chunk embeddings |
//!
//! Each metric is the mean over pairs, scaled to `[0, 100]` and rounded to
//! two decimals. Drift is `100 - stability`.

use std::collections::BTreeSet;
use std::hash::Hash;

use sha2::{Digest, Sha256};

use crate::embedding::{mean_cross_similarity, Embedder};
use crate::error::ProviderError;
use crate::models::{round2, RetrievalResult, StabilityReport};
use crate::retrieve::Retriever;

/// Number of leading characters that feed the synthetic id hash.
const ID_PREFIX_CHARS: usize = 100;

/// `|A ∩ B| / max(1, |A ∪ B|)`.
///
/// Two empty sets score 0.
pub fn jaccard<T: Ord + Hash>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union.max(1) as f64
}

/// Synthetic id used only to compare runs: `{source}_{page}_{hash}`.
///
/// The hash is the first 16 hex characters of SHA-256 over the first 100
/// characters of the chunk text.
pub fn chunk_id(source_file: &str, page_or_offset: i64, text: &str) -> String {
    let prefix: String = text.chars().take(ID_PREFIX_CHARS).collect();
    let digest = Sha256::digest(prefix.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}_{}", source_file, page_or_offset, hex)
}

fn id_set(run: &RetrievalResult) -> BTreeSet<String> {
    run.chunks
        .iter()
        .map(|c| chunk_id(&c.chunk.source_file, c.chunk.page_or_offset, &c.chunk.text))
        .collect()
}

fn source_set(run: &RetrievalResult) -> BTreeSet<String> {
    run.chunks.iter().map(|c| c.chunk.source_file.clone()).collect()
}

/// Mean of `score(i, j)` over every unordered pair `i < j`.
fn mean_over_pairs<F>(n: usize, mut score: F) -> f64
where
    F: FnMut(usize, usize) -> f64,
{
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            total += score(i, j);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

/// Pairwise Jaccard stability of synthetic chunk ids, in `[0, 100]`.
pub fn id_stability(runs: &[RetrievalResult]) -> f64 {
    let sets: Vec<_> = runs.iter().map(id_set).collect();
    round2(100.0 * mean_over_pairs(sets.len(), |i, j| jaccard(&sets[i], &sets[j])))
}

/// Pairwise Jaccard stability of source files, in `[0, 100]`.
pub fn source_stability(runs: &[RetrievalResult]) -> f64 {
    let sets: Vec<_> = runs.iter().map(source_set).collect();
    round2(100.0 * mean_over_pairs(sets.len(), |i, j| jaccard(&sets[i], &sets[j])))
}

/// Embedding-based stability, in `[0, 100]`.
///
/// Fewer than two runs are trivially stable (100). Provider failures
/// propagate so the caller can decide how to score them.
pub async fn content_stability(
    runs: &[RetrievalResult],
    embedder: &dyn Embedder,
) -> Result<f64, ProviderError> {
    if runs.len() < 2 {
        return Ok(100.0);
    }
    let mut embedded = Vec::with_capacity(runs.len());
    for run in runs {
        embedded.push(embedder.embed_batch(&run.texts()).await?);
    }
    let mean = mean_over_pairs(embedded.len(), |i, j| {
        mean_cross_similarity(&embedded[i], &embedded[j])
    });
    Ok(round2(100.0 * mean))
}

/// Compute a [`StabilityReport`] from runs that were already collected.
///
/// Empty runs are discarded first; `total_runs` counts all of them.
pub async fn stability_from_runs(
    runs: Vec<RetrievalResult>,
    embedder: &dyn Embedder,
) -> StabilityReport {
    let total_runs = runs.len();
    let runs: Vec<RetrievalResult> = runs.into_iter().filter(|r| !r.is_empty()).collect();
    if runs.len() < 2 {
        return StabilityReport::degenerate(runs.len(), total_runs);
    }

    let content = match content_stability(&runs, embedder).await {
        Ok(score) => score,
        Err(e) => {
            tracing::warn!(error = %e, "content stability failed; scoring 0");
            0.0
        }
    };

    StabilityReport {
        id_stability: id_stability(&runs),
        source_stability: source_stability(&runs),
        content_stability: content,
        successful_runs: runs.len(),
        total_runs,
        run_sources: runs.iter().map(RetrievalResult::sources).collect(),
    }
}

/// Retrieve `query` `num_runs` times and measure how much the results drift.
///
/// A run whose retrieval fails is logged and counted as empty.
pub async fn measure_stability(
    retriever: &Retriever<'_>,
    query: &str,
    num_runs: usize,
    k: usize,
    category_filter: Option<&[String]>,
) -> StabilityReport {
    let mut runs = Vec::with_capacity(num_runs);
    for run in 0..num_runs {
        match retriever.retrieve(query, k, category_filter).await {
            Ok(result) => {
                tracing::debug!(run = run + 1, chunks = result.len(), "retrieval run");
                runs.push(result);
            }
            Err(e) => {
                tracing::warn!(run = run + 1, query, error = %e, "retrieval run failed");
                runs.push(RetrievalResult::empty(query, category_filter));
            }
        }
    }
    stability_from_runs(runs, retriever.embedder()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, RetrievedChunk};
    use async_trait::async_trait;

    struct LengthEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Transient("offline".into()));
            }
            Ok(vec![1.0, text.len() as f32])
        }
    }

    fn run(items: &[(&str, i64, &str)]) -> RetrievalResult {
        RetrievalResult {
            query: "q".into(),
            category_filter: None,
            chunks: items
                .iter()
                .map(|(src, page, text)| RetrievedChunk {
                    chunk: Chunk {
                        text: text.to_string(),
                        source_file: src.to_string(),
                        source_path: src.to_string(),
                        page_or_offset: *page,
                        category_tag: String::new(),
                        embedding: vec![],
                    },
                    score: 1.0,
                })
                .collect(),
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn jaccard_basics() {
        let a = set(&["x", "y"]);
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &set(&["y", "z"])), 1.0 / 3.0);
        assert_eq!(jaccard(&a, &set(&["z"])), 0.0);
        assert_eq!(jaccard::<String>(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn chunk_id_is_deterministic_and_prefix_based() {
        let long_a = format!("{}{}", "a".repeat(100), "tail one");
        let long_b = format!("{}{}", "a".repeat(100), "tail two");
        assert_eq!(chunk_id("f.pdf", 3, &long_a), chunk_id("f.pdf", 3, &long_b));
        assert_ne!(chunk_id("f.pdf", 3, "abc"), chunk_id("f.pdf", 4, "abc"));
        let id = chunk_id("f.pdf", 3, "abc");
        assert!(id.starts_with("f.pdf_3_"));
        assert_eq!(id.len(), "f.pdf_3_".len() + 16);
    }

    #[tokio::test]
    async fn identical_runs_are_fully_stable() {
        let r = run(&[("a.pdf", 0, "alpha"), ("b.pdf", 1, "beta")]);
        let emb = LengthEmbedder { fail: false };
        let report = stability_from_runs(vec![r.clone(), r.clone(), r], &emb).await;
        assert_eq!(report.id_stability, 100.0);
        assert_eq!(report.source_stability, 100.0);
        assert_eq!(report.successful_runs, 3);
        assert_eq!(report.run_sources.len(), 3);
        assert_eq!(report.to_record().id_drift, 0.0);
    }

    #[tokio::test]
    async fn partial_overlap_scores() {
        let r1 = run(&[("a.pdf", 0, "alpha"), ("b.pdf", 0, "beta")]);
        let r2 = run(&[("a.pdf", 0, "alpha"), ("c.pdf", 0, "gamma")]);
        let emb = LengthEmbedder { fail: false };
        let report = stability_from_runs(vec![r1, r2], &emb).await;
        assert_eq!(report.id_stability, 33.33);
        assert_eq!(report.source_stability, 33.33);
        let rec = report.to_record();
        assert!((rec.id_stability + rec.id_drift - 100.0).abs() < 0.011);
    }

    #[tokio::test]
    async fn fewer_than_two_nonempty_runs_is_degenerate() {
        let emb = LengthEmbedder { fail: false };
        let report = stability_from_runs(
            vec![run(&[("a.pdf", 0, "alpha")]), run(&[]), run(&[])],
            &emb,
        )
        .await;
        assert_eq!(report.successful_runs, 1);
        assert_eq!(report.total_runs, 3);
        assert_eq!(report.id_stability, 0.0);
        assert_eq!(report.to_record().content_drift, 100.0);
    }

    #[tokio::test]
    async fn content_stability_single_run_is_full() {
        let emb = LengthEmbedder { fail: false };
        let score = content_stability(&[run(&[("a.pdf", 0, "alpha")])], &emb)
            .await
            .unwrap();
        assert_eq!(score, 100.0);
    }

    #[tokio::test]
    async fn provider_failure_zeroes_content_only() {
        let r = run(&[("a.pdf", 0, "alpha")]);
        let emb = LengthEmbedder { fail: true };
        let report = stability_from_runs(vec![r.clone(), r], &emb).await;
        assert_eq!(report.content_stability, 0.0);
        assert_eq!(report.id_stability, 100.0);
    }
}
