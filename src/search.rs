//! `fdraft search`: one retrieval, printed with scores and provenance.

use anyhow::Result;

use facilities_core::retrieve::Retriever;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_index::SqliteIndex;

pub async fn run_search(config: &Config, query: &str, k: Option<usize>, filter: Vec<String>) -> Result<()> {
    let k = k.unwrap_or(config.retrieval.k);
    let index = SqliteIndex::open(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let retriever = Retriever::new(&index, embedder.as_ref())
        .with_overfetch_factor(config.retrieval.overfetch_factor);

    let filter = (!filter.is_empty()).then_some(filter);
    let result = retriever.retrieve(query, k, filter.as_deref()).await?;

    if result.is_empty() {
        println!("No results.");
        index.close().await;
        return Ok(());
    }

    for (i, hit) in result.chunks.iter().enumerate() {
        let c = &hit.chunk;
        let tag = if c.category_tag.is_empty() { "-" } else { c.category_tag.as_str() };
        println!("{}. [{:.3}] {} / {}", i + 1, hit.score, tag, c.source_file);
        println!("    path: {}", c.source_path);
        println!("    page/offset: {}", c.page_or_offset);
        let excerpt: String = c.text.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!();
    }

    index.close().await;
    Ok(())
}
