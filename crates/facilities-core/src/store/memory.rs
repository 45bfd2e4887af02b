//! In-memory [`VectorIndex`] implementation for testing and WASM targets.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`, in insertion order.
//! Queries are brute-force cosine similarity over all stored vectors.

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Chunk, CorpusSummary, RetrievedChunk};

use super::{check_batch_dims, rank_by_similarity, summarize, VectorIndex};

#[derive(Default)]
struct State {
    chunks: Vec<Chunk>,
    dims: Option<usize>,
}

/// In-memory index for tests and WASM environments.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.write()?;
        state.dims = check_batch_dims(chunks, state.dims)?;
        state.chunks.extend_from_slice(chunks);
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        let state = self.read()?;
        Ok(rank_by_similarity(embedding, state.chunks.iter().cloned(), k))
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>> {
        let state = self.read()?;
        Ok(state.chunks.iter().map(|c| c.source_file.clone()).collect())
    }

    async fn list_source_paths(&self) -> Result<BTreeSet<String>> {
        let state = self.read()?;
        Ok(state.chunks.iter().map(|c| c.source_path.clone()).collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.chunks.len())
    }

    async fn summary(&self, tag_filter: Option<&[String]>) -> Result<CorpusSummary> {
        let state = self.read()?;
        Ok(summarize(
            state
                .chunks
                .iter()
                .map(|c| (c.source_file.as_str(), c.category_tag.as_str())),
            tag_filter,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;

    fn chunk(source: &str, tag: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            text: format!("{} body", source),
            source_file: source.to_string(),
            source_path: format!("{}/{}", tag, source),
            page_or_offset: 0,
            category_tag: tag.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn add_then_query_orders_by_similarity() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                chunk("a.pdf", "NSF", vec![1.0, 0.0]),
                chunk("b.pdf", "NIH", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&[0.1, 0.9], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.source_file, "b.pdf");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn catalogue_and_counts() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                chunk("a.pdf", "NSF", vec![1.0]),
                chunk("a.pdf", "NSF", vec![0.5]),
                chunk("b.pdf", "NIH", vec![0.2]),
            ])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 3);
        let sources = index.list_sources().await.unwrap();
        assert_eq!(sources.into_iter().collect::<Vec<_>>(), vec!["a.pdf", "b.pdf"]);
        assert!(index.list_source_paths().await.unwrap().contains("NIH/b.pdf"));

        let nsf = index.summary(Some(&["NSF".to_string()])).await.unwrap();
        assert_eq!(nsf.total_chunks, 2);
        assert_eq!(nsf.unique_sources, 1);
    }

    #[tokio::test]
    async fn rejects_dimension_change() {
        let index = InMemoryIndex::new();
        index.add(&[chunk("a.pdf", "", vec![1.0, 0.0])]).await.unwrap();

        let err = index
            .add(&[chunk("b.pdf", "", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::DimensionMismatch { .. })
        ));
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_index_queries_empty() {
        let index = InMemoryIndex::new();
        assert!(index.query(&[1.0], 5).await.unwrap().is_empty());
        assert!(index.list_sources().await.unwrap().is_empty());
    }
}
