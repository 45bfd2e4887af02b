//! Index statistics: what is in the collection, broken down by category.

use anyhow::Result;

use facilities_core::store::VectorIndex;

use crate::config::Config;
use crate::sqlite_index::SqliteIndex;

/// Run the stats command: query the collection and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let db_path = config.index.db_path();
    let index = SqliteIndex::open(config).await?;

    let summary = index.summary(None).await?;
    let dims = index.dims().await?;
    let breakdown = index.category_breakdown().await?;
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("Facilities Drafter Index Stats");
    println!("==============================");
    println!();
    println!("  Index:       {}", db_path.display());
    println!("  Collection:  {}", config.index.collection);
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Chunks:      {}", summary.total_chunks);
    println!("  Sources:     {}", summary.unique_sources);
    match dims {
        Some(d) => println!("  Dimensions:  {}", d),
        None => println!("  Dimensions:  (empty index)"),
    }

    if !breakdown.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<32} {:>8} {:>8}", "CATEGORY", "SOURCES", "CHUNKS");
        println!("  {}", "-".repeat(50));
        for row in &breakdown {
            let tag = if row.category_tag.is_empty() {
                "(root)"
            } else {
                row.category_tag.as_str()
            };
            println!("  {:<32} {:>8} {:>8}", tag, row.sources, row.chunks);
        }
    }

    println!();
    index.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_format() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
