//! Semantic retrieval with optional category filtering.
//!
//! Filtering happens after ranking: the retriever over-fetches
//! `k × overfetch_factor` nearest chunks, scans them in rank order and keeps
//! those whose category tag contains any filter value, stopping at `k`.
//! Returning fewer than `k` chunks is a legitimate outcome, not an error.

use anyhow::{Context, Result};

use crate::embedding::Embedder;
use crate::models::{RetrievalResult, RetrievedChunk};
use crate::store::VectorIndex;

pub const DEFAULT_OVERFETCH_FACTOR: usize = 3;

/// Query-time view over an index and the provider that embedded it.
pub struct Retriever<'a> {
    index: &'a dyn VectorIndex,
    embedder: &'a dyn Embedder,
    overfetch_factor: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a dyn VectorIndex, embedder: &'a dyn Embedder) -> Self {
        Self {
            index,
            embedder,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }

    pub fn with_overfetch_factor(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor.max(1);
        self
    }

    pub fn embedder(&self) -> &'a dyn Embedder {
        self.embedder
    }

    /// Retrieve the `k` chunks most similar to `query`.
    ///
    /// An empty filter slice behaves like no filter. Blank queries and
    /// `k = 0` return an empty result without calling the provider.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        category_filter: Option<&[String]>,
    ) -> Result<RetrievalResult> {
        let filter = category_filter.filter(|f| !f.is_empty());
        let mut result = RetrievalResult::empty(query, filter);
        if query.trim().is_empty() || k == 0 {
            return Ok(result);
        }

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .context("failed to embed query")?;

        result.chunks = match filter {
            None => self.index.query(&query_vec, k).await?,
            Some(filter) => {
                let candidates = self
                    .index
                    .query(&query_vec, k.saturating_mul(self.overfetch_factor))
                    .await?;
                filter_ranked(candidates, filter, k)
            }
        };
        Ok(result)
    }
}

fn filter_ranked(candidates: Vec<RetrievedChunk>, filter: &[String], k: usize) -> Vec<RetrievedChunk> {
    candidates
        .into_iter()
        .filter(|c| c.chunk.matches_category(filter))
        .take(k)
        .collect()
}
