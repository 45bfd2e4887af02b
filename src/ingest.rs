//! Ingestion pipeline: document tree → chunks → embeddings → index.
//!
//! Walks the configured root, keeps files matching the include globs, tags
//! each with the name of the directory it sits in, splits the extracted text
//! into overlapping chunks, embeds them and appends them to the index.
//!
//! # Idempotency
//!
//! Before processing, the index catalogue is loaded. A file whose key
//! (file name, or relative path with `dedup_key = "relative_path"`) is
//! already present is skipped entirely, even if its contents changed.
//!
//! # Failure handling
//!
//! The embed+commit step for a file is attempted up to `max_attempts`
//! times with a fixed `cooldown_secs` wait between attempts (rate limits are
//! logged as such). A file that exhausts its attempts is abandoned and the
//! run continues. Extraction failures are not retried. After every file
//! that was committed the pipeline pauses `pause_secs` before embedding the
//! next one.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use facilities_core::chunk::TextSplitter;
use facilities_core::embedding::Embedder;
use facilities_core::error::ProviderError;
use facilities_core::models::Chunk;
use facilities_core::store::VectorIndex;

use crate::config::{Config, DedupKey, IngestConfig};
use crate::embedding::{create_embedder, DisabledEmbedder};
use crate::extract;
use crate::sqlite_index::SqliteIndex;

/// A document found under the ingestion root.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated.
    pub relative_path: String,
    pub file_name: String,
    /// Name of the containing directory; empty for files at the root.
    pub category_tag: String,
}

impl SourceFile {
    fn dedup_key(&self, key: DedupKey) -> &str {
        match key {
            DedupKey::Filename => &self.file_name,
            DedupKey::RelativePath => &self.relative_path,
        }
    }
}

/// Outcome counts of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestStats {
    pub files_found: usize,
    pub skipped_existing: usize,
    pub indexed: usize,
    pub failed: usize,
    pub extraction_skipped: usize,
    pub chunks_written: usize,
}

impl IngestStats {
    pub fn print(&self, root: &Path, dry_run: bool) {
        if dry_run {
            println!("ingest {} (dry-run)", root.display());
        } else {
            println!("ingest {}", root.display());
        }
        println!("  files found: {}", self.files_found);
        println!("  skipped (already indexed): {}", self.skipped_existing);
        println!("  skipped (no extractable text): {}", self.extraction_skipped);
        if dry_run {
            println!("  files to index: {}", self.indexed);
            println!("  estimated chunks: {}", self.chunks_written);
        } else {
            println!("  indexed: {}", self.indexed);
            println!("  failed: {}", self.failed);
            println!("  chunks written: {}", self.chunks_written);
        }
        println!("ok");
    }
}

/// Retry and pacing knobs, taken from `[ingest]`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
    pub pause: Duration,
}

impl From<&IngestConfig> for RetryPolicy {
    fn from(cfg: &IngestConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            cooldown: Duration::from_secs(cfg.cooldown_secs),
            pause: Duration::from_secs(cfg.pause_secs),
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// List ingestible documents under `root`, sorted by relative path.
pub fn scan_documents(root: &Path, cfg: &IngestConfig) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        bail!("Ingestion root does not exist: {}", root.display());
    }

    let include_set = build_globset(&cfg.include_globs)?;
    let exclude_set = build_globset(&cfg.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(cfg.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Dangling symlinks and unreadable directories.
                tracing::warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        if !extract::is_supported(path) {
            tracing::debug!(file = %rel_str, "no extractor for file type; skipping");
            continue;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let category_tag = relative
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        files.push(SourceFile {
            path: path.to_path_buf(),
            relative_path: rel_str,
            file_name,
            category_tag,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Ingest every new document under `root` into `index`.
///
/// With `dry_run`, files are scanned, extracted and split, but nothing is
/// embedded or written; `chunks_written` then holds the estimate.
pub async fn ingest(
    root: &Path,
    config: &Config,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    dry_run: bool,
) -> Result<IngestStats> {
    let files = scan_documents(root, &config.ingest)?;
    let splitter = TextSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap);
    let policy = RetryPolicy::from(&config.ingest);
    let dedup = config.ingest.dedup_key;

    let mut catalogue: BTreeSet<String> = match dedup {
        DedupKey::Filename => index.list_sources().await?,
        DedupKey::RelativePath => index.list_source_paths().await?,
    };

    let mut stats = IngestStats {
        files_found: files.len(),
        ..IngestStats::default()
    };
    let mut pause_pending = false;

    tracing::info!(root = %root.display(), files = files.len(), "starting ingestion");

    for file in &files {
        let key = file.dedup_key(dedup);
        if catalogue.contains(key) {
            tracing::debug!(file = %file.relative_path, "already indexed; skipping");
            stats.skipped_existing += 1;
            continue;
        }

        let chunks = match split_file(file, splitter).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(file = %file.relative_path, error = %e, "extraction skipped");
                stats.extraction_skipped += 1;
                continue;
            }
        };

        if dry_run {
            stats.indexed += 1;
            stats.chunks_written += chunks.len();
            continue;
        }

        if pause_pending && !policy.pause.is_zero() {
            tracing::debug!(secs = policy.pause.as_secs(), "pausing between files");
            tokio::time::sleep(policy.pause).await;
        }

        match commit_with_retry(file, chunks, index, embedder, &policy).await {
            Some(n) => {
                tracing::info!(file = %file.relative_path, chunks = n, tag = %file.category_tag, "indexed");
                stats.indexed += 1;
                stats.chunks_written += n;
                catalogue.insert(key.to_string());
                pause_pending = true;
            }
            None => stats.failed += 1,
        }
    }

    tracing::info!(
        indexed = stats.indexed,
        skipped = stats.skipped_existing,
        failed = stats.failed,
        "ingestion finished"
    );
    Ok(stats)
}

/// Extract and split one file into chunks without embeddings.
///
/// Extraction runs on a blocking thread; a parser panic surfaces as an
/// extraction error for this file only.
async fn split_file(file: &SourceFile, splitter: TextSplitter) -> Result<Vec<Chunk>> {
    let path = file.path.clone();
    let doc = tokio::task::spawn_blocking(move || extract::extract_document(&path))
        .await
        .with_context(|| format!("extraction task failed for {}", file.relative_path))??;
    let chunks: Vec<Chunk> = splitter
        .split_document(&doc)
        .into_iter()
        .map(|piece| Chunk {
            text: piece.text,
            source_file: file.file_name.clone(),
            source_path: file.relative_path.clone(),
            page_or_offset: piece.page_or_offset,
            category_tag: file.category_tag.clone(),
            embedding: Vec::new(),
        })
        .collect();
    if chunks.is_empty() {
        bail!(extract::ExtractError::Empty);
    }
    Ok(chunks)
}

/// Run the embed+commit step under the retry policy. Returns the number of
/// chunks written, or `None` once every attempt failed.
async fn commit_with_retry(
    file: &SourceFile,
    chunks: Vec<Chunk>,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    policy: &RetryPolicy,
) -> Option<usize> {
    for attempt in 1..=policy.max_attempts {
        match embed_and_commit(chunks.clone(), index, embedder).await {
            Ok(n) => return Some(n),
            Err(e) => {
                let rate_limited = e
                    .downcast_ref::<ProviderError>()
                    .is_some_and(ProviderError::is_rate_limit);
                if attempt == policy.max_attempts {
                    tracing::error!(
                        file = %file.relative_path,
                        attempts = attempt,
                        error = %e,
                        "giving up on file"
                    );
                    break;
                }
                if rate_limited {
                    tracing::warn!(file = %file.relative_path, attempt, cooldown_secs = policy.cooldown.as_secs(), "rate limited; cooling down");
                } else {
                    tracing::warn!(file = %file.relative_path, attempt, error = %e, "ingestion attempt failed; retrying");
                }
                if !policy.cooldown.is_zero() {
                    tokio::time::sleep(policy.cooldown).await;
                }
            }
        }
    }
    None
}

async fn embed_and_commit(
    mut chunks: Vec<Chunk>,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
) -> Result<usize> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed_batch(&texts).await?;
    if vectors.len() != chunks.len() {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            chunks.len(),
            vectors.len()
        ))
        .into());
    }
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        chunk.embedding = vector;
    }
    index.add(&chunks).await?;
    Ok(chunks.len())
}

/// `fdraft ingest`: ingest the configured (or overridden) root into the
/// SQLite collection and print the summary.
pub async fn run_ingest(config: &Config, root: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let root = root.unwrap_or_else(|| config.ingest.root.clone());
    let index = SqliteIndex::open(config).await?;

    let stats = if dry_run {
        ingest(&root, config, &index, &DisabledEmbedder, true).await?
    } else {
        if !config.embedding.is_enabled() {
            bail!("Embedding provider is disabled; configure [embedding] before ingesting");
        }
        let embedder = create_embedder(&config.embedding)?;
        ingest(&root, config, &index, embedder.as_ref(), false).await?
    };

    stats.print(&root, dry_run);
    index.close().await;
    Ok(())
}
