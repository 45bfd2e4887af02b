//! SQLite-backed [`VectorIndex`] implementation.
//!
//! One collection per SQLite file. Chunks are stored with their embedding
//! as a little-endian `f32` BLOB; queries load every vector and rank by
//! cosine similarity in memory, which is adequate for the few thousand
//! chunks a facilities corpus produces.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use facilities_core::embedding::{blob_to_vec, vec_to_blob};
use facilities_core::models::{Chunk, CorpusSummary, RetrievedChunk};
use facilities_core::store::{check_batch_dims, rank_by_similarity, summarize, VectorIndex};

use crate::config::Config;
use crate::{db, migrate};

const DIMS_KEY: &str = "embedding_dims";

/// Per-category row of [`SqliteIndex::category_breakdown`].
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryCount {
    pub category_tag: String,
    pub chunks: usize,
    pub sources: usize,
}

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (and create if needed) the configured collection.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.index.db_path()).await
    }

    pub async fn open_path(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to initialize index schema")?;
        Ok(Self::new(pool))
    }

    /// Embedding dimensionality recorded by the first write, if any.
    pub async fn dims(&self) -> Result<Option<usize>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(DIMS_KEY)
                .fetch_optional(&self.pool)
                .await?;
        value
            .map(|v| {
                v.parse::<usize>()
                    .with_context(|| format!("corrupt {} in index_meta: {}", DIMS_KEY, v))
            })
            .transpose()
    }

    /// Chunk and distinct-source counts per category tag, largest first.
    pub async fn category_breakdown(&self) -> Result<Vec<CategoryCount>> {
        let rows = sqlx::query(
            r#"
            SELECT category_tag,
                   COUNT(*) AS chunk_count,
                   COUNT(DISTINCT source_file) AS source_count
            FROM chunks
            GROUP BY category_tag
            ORDER BY chunk_count DESC, category_tag ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CategoryCount {
                category_tag: row.get("category_tag"),
                chunks: row.get::<i64, _>("chunk_count") as usize,
                sources: row.get::<i64, _>("source_count") as usize,
            })
            .collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn add(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let existing = self.dims().await?;
        let dims = check_batch_dims(chunks, existing)?;

        let mut tx = self.pool.begin().await?;

        if existing.is_none() {
            if let Some(dims) = dims {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                    .bind(DIMS_KEY)
                    .bind(dims.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let now = chrono::Utc::now().timestamp();
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, text, source_file, source_path, page_or_offset,
                                    category_tag, embedding, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&chunk.text)
            .bind(&chunk.source_file)
            .bind(&chunk.source_path)
            .bind(chunk.page_or_offset)
            .bind(&chunk.category_tag)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT text, source_file, source_path, page_or_offset, category_tag, embedding
            FROM chunks
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let chunks = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            Chunk {
                text: row.get("text"),
                source_file: row.get("source_file"),
                source_path: row.get("source_path"),
                page_or_offset: row.get("page_or_offset"),
                category_tag: row.get("category_tag"),
                embedding: blob_to_vec(&blob),
            }
        });

        Ok(rank_by_similarity(embedding, chunks, k))
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>> {
        let sources: Vec<String> = sqlx::query_scalar("SELECT DISTINCT source_file FROM chunks")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources.into_iter().collect())
    }

    async fn list_source_paths(&self) -> Result<BTreeSet<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT DISTINCT source_path FROM chunks")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths.into_iter().collect())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn summary(&self, tag_filter: Option<&[String]>) -> Result<CorpusSummary> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT source_file, category_tag FROM chunks")
                .fetch_all(&self.pool)
                .await?;
        Ok(summarize(
            rows.iter().map(|(s, t)| (s.as_str(), t.as_str())),
            tag_filter,
        ))
    }
}
