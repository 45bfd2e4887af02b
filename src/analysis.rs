//! Drift and overlap analysis commands and their JSON report files.
//!
//! `fdraft analyze drift` repeats each configured query and records how
//! stable the results are; `fdraft analyze overlap` retrieves each query
//! once and records semantic overlap and source diversity; `fdraft analyze
//! compare` prints two drift reports side by side (e.g. before and after a
//! re-ingest).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use facilities_core::drift::measure_stability;
use facilities_core::models::{CorpusSummary, DriftRecord, OverlapReport, StabilityReport};
use facilities_core::overlap::measure_overlap;
use facilities_core::retrieve::Retriever;
use facilities_core::store::VectorIndex;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_index::SqliteIndex;

pub const DRIFT_REPORT_FILE: &str = "drift_analysis.json";
pub const OVERLAP_REPORT_FILE: &str = "overlap_analysis.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReportFile {
    pub generated_at: String,
    pub category_filter: Vec<String>,
    pub corpus_summary: CorpusSummary,
    pub drift_analysis: BTreeMap<String, DriftRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapReportFile {
    pub generated_at: String,
    pub category_filter: Vec<String>,
    pub corpus_summary: CorpusSummary,
    pub semantic_analysis: BTreeMap<String, OverlapReport>,
}

/// Parameters shared by the drift and overlap commands; `None` falls back
/// to `[analysis]`.
#[derive(Debug, Clone, Default)]
pub struct AnalysisArgs {
    pub queries: Vec<String>,
    pub runs: Option<usize>,
    pub k: Option<usize>,
    pub filter: Vec<String>,
    pub out: Option<PathBuf>,
}

struct Resolved {
    queries: Vec<String>,
    runs: usize,
    k: usize,
    filter: Vec<String>,
}

impl AnalysisArgs {
    fn resolve(&self, config: &Config) -> Resolved {
        let a = &config.analysis;
        Resolved {
            queries: if self.queries.is_empty() {
                a.queries.clone()
            } else {
                self.queries.clone()
            },
            runs: self.runs.unwrap_or(a.num_runs).max(1),
            k: self.k.unwrap_or(a.k),
            filter: if self.filter.is_empty() {
                a.category_filter.clone()
            } else {
                self.filter.clone()
            },
        }
    }

    fn out_path(&self, config: &Config, default_name: &str) -> PathBuf {
        self.out
            .clone()
            .unwrap_or_else(|| config.analysis.output_dir.join(default_name))
    }
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn filter_opt(filter: &[String]) -> Option<&[String]> {
    (!filter.is_empty()).then_some(filter)
}

/// Run drift analysis for every query against an already-open index.
pub async fn drift_report(
    retriever: &Retriever<'_>,
    index: &dyn VectorIndex,
    queries: &[String],
    runs: usize,
    k: usize,
    filter: &[String],
) -> Result<(DriftReportFile, Vec<(String, StabilityReport)>)> {
    let corpus_summary = index.summary(filter_opt(filter)).await?;
    let mut detailed = Vec::with_capacity(queries.len());
    let mut records = BTreeMap::new();
    for query in queries {
        let report = measure_stability(retriever, query, runs, k, filter_opt(filter)).await;
        records.insert(query.clone(), report.to_record());
        detailed.push((query.clone(), report));
    }
    Ok((
        DriftReportFile {
            generated_at: now_iso(),
            category_filter: filter.to_vec(),
            corpus_summary,
            drift_analysis: records,
        },
        detailed,
    ))
}

/// Run overlap analysis for every query against an already-open index.
///
/// Queries that retrieve nothing (or whose retrieval fails) are left out of
/// `semantic_analysis` rather than recorded as all-zero reports.
pub async fn overlap_report(
    retriever: &Retriever<'_>,
    index: &dyn VectorIndex,
    queries: &[String],
    k: usize,
    filter: &[String],
) -> Result<OverlapReportFile> {
    let corpus_summary = index.summary(filter_opt(filter)).await?;
    let mut reports = BTreeMap::new();
    for query in queries {
        let result = match retriever.retrieve(query, k, filter_opt(filter)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "retrieval failed; query skipped");
                continue;
            }
        };
        if result.is_empty() {
            tracing::warn!(query = %query, "no chunks retrieved; query skipped");
            continue;
        }
        reports.insert(query.clone(), measure_overlap(&result, retriever.embedder()).await);
    }
    Ok(OverlapReportFile {
        generated_at: now_iso(),
        category_filter: filter.to_vec(),
        corpus_summary,
        semantic_analysis: reports,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))
}

pub fn load_drift_report(path: &Path) -> Result<DriftReportFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Not a drift report: {}", path.display()))
}

fn print_summary(summary: &CorpusSummary, filter: &[String]) {
    let label = if filter.is_empty() {
        "all".to_string()
    } else {
        filter.join(", ")
    };
    println!("corpus ({})", label);
    println!("  total chunks: {}", summary.total_chunks);
    println!("  unique sources: {}", summary.unique_sources);
    println!();
}

/// `fdraft analyze drift`.
pub async fn run_drift(config: &Config, args: &AnalysisArgs) -> Result<()> {
    let r = args.resolve(config);
    let index = SqliteIndex::open(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let retriever = Retriever::new(&index, embedder.as_ref())
        .with_overfetch_factor(config.retrieval.overfetch_factor);

    let (file, detailed) = drift_report(&retriever, &index, &r.queries, r.runs, r.k, &r.filter).await?;
    print_summary(&file.corpus_summary, &r.filter);

    for (query, report) in &detailed {
        let rec = report.to_record();
        println!("drift \"{}\"", query);
        for (i, sources) in report.run_sources.iter().enumerate() {
            println!("  run {}: {} chunks, sources: [{}]", i + 1, sources.len(), sources.join(", "));
        }
        println!("  successful runs: {}/{}", rec.successful_runs, rec.total_runs);
        println!("  id stability: {:.2} (drift {:.2})", rec.id_stability, rec.id_drift);
        println!("  source stability: {:.2} (drift {:.2})", rec.source_stability, rec.source_drift);
        println!("  content stability: {:.2} (drift {:.2})", rec.content_stability, rec.content_drift);
        println!();
    }

    let out = args.out_path(config, DRIFT_REPORT_FILE);
    write_json(&out, &file)?;
    println!("report written: {}", out.display());

    index.close().await;
    Ok(())
}

/// `fdraft analyze overlap`.
pub async fn run_overlap(config: &Config, args: &AnalysisArgs) -> Result<()> {
    let r = args.resolve(config);
    let index = SqliteIndex::open(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let retriever = Retriever::new(&index, embedder.as_ref())
        .with_overfetch_factor(config.retrieval.overfetch_factor);

    let file = overlap_report(&retriever, &index, &r.queries, r.k, &r.filter).await?;
    print_summary(&file.corpus_summary, &r.filter);

    for (query, report) in &file.semantic_analysis {
        println!("overlap \"{}\"", query);
        println!("  retrieved: {}", report.retrieved_count);
        println!("  unique sources: {}", report.unique_sources);
        println!("  semantic overlap: {:.2}", report.semantic_overlap);
        println!("  source diversity: {:.2}", report.source_diversity);
        for (source, count) in &report.source_distribution {
            println!("    {}: {}", source, count);
        }
        println!();
    }

    let out = args.out_path(config, OVERLAP_REPORT_FILE);
    write_json(&out, &file)?;
    println!("report written: {}", out.display());

    index.close().await;
    Ok(())
}

/// Rows of the comparison table: (query, metric, a, b) for every query in
/// either report. A query missing from one side shows `None` there.
pub fn compare_rows(a: &DriftReportFile, b: &DriftReportFile) -> Vec<(String, &'static str, Option<f64>, Option<f64>)> {
    let mut queries: Vec<&String> = a.drift_analysis.keys().chain(b.drift_analysis.keys()).collect();
    queries.sort();
    queries.dedup();

    let metric = |r: Option<&DriftRecord>, name: &str| -> Option<f64> {
        r.map(|r| match name {
            "id drift" => r.id_drift,
            "source drift" => r.source_drift,
            _ => r.content_drift,
        })
    };

    let mut rows = Vec::new();
    for q in queries {
        let ra = a.drift_analysis.get(q);
        let rb = b.drift_analysis.get(q);
        for name in ["id drift", "source drift", "content drift"] {
            rows.push((q.clone(), name, metric(ra, name), metric(rb, name)));
        }
    }
    rows
}

/// `fdraft analyze compare A B`.
pub fn run_compare(a_path: &Path, b_path: &Path) -> Result<()> {
    let a = load_drift_report(a_path)?;
    let b = load_drift_report(b_path)?;

    println!("A: {} ({})", a_path.display(), a.generated_at);
    println!("B: {} ({})", b_path.display(), b.generated_at);
    println!(
        "  chunks: {} -> {}   sources: {} -> {}",
        a.corpus_summary.total_chunks,
        b.corpus_summary.total_chunks,
        a.corpus_summary.unique_sources,
        b.corpus_summary.unique_sources
    );
    println!();
    println!("  {:<40} {:<14} {:>8} {:>8} {:>8}", "QUERY", "METRIC", "A", "B", "DELTA");
    println!("  {}", "-".repeat(82));

    let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
    for (query, metric, va, vb) in compare_rows(&a, &b) {
        let delta = match (va, vb) {
            (Some(x), Some(y)) => format!("{:+.2}", y - x),
            _ => "-".into(),
        };
        let short: String = query.chars().take(40).collect();
        println!("  {:<40} {:<14} {:>8} {:>8} {:>8}", short, metric, fmt(va), fmt(vb), delta);
    }
    println!();
    Ok(())
}
