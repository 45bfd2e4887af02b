//! SQLite connection management.
//!
//! Each named collection lives in its own SQLite file inside
//! `index.persist_directory`. The file and its parent directories are
//! created on first connect.
//!
//! # Write-Ahead Logging (WAL)
//!
//! WAL mode is enabled for all connections so that analysis runs can read
//! while an ingestion run writes. Concurrent ingestion runs against one
//! collection are still unsupported.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open a pool on an explicit SQLite file.
pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create index directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index: {}", db_path.display()))?;

    Ok(pool)
}
