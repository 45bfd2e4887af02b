//! Core data models used throughout Facilities Drafter.
//!
//! These types represent the chunks stored in the vector index, the result
//! of a single retrieval, and the derived stability/overlap reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A bounded span of document text tagged with provenance.
///
/// Created during ingestion and immutable afterwards. Uniqueness is only
/// tracked per `source_file`: two chunks may carry identical text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// File name without directories, e.g. `"Proposal_2311.pdf"`.
    pub source_file: String,
    /// Path relative to the ingestion root, e.g. `"NSF/Proposal_2311.pdf"`.
    pub source_path: String,
    /// 0-based page for paginated formats, byte offset otherwise.
    pub page_or_offset: i64,
    /// Name of the directory the file was found in (e.g. `"NSF"`).
    pub category_tag: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// True when the chunk's category tag contains any of `filter`.
    ///
    /// Matching is by substring, so a tag of `"NSF-CISE"` satisfies `"NSF"`.
    pub fn matches_category(&self, filter: &[String]) -> bool {
        filter.iter().any(|f| self.category_tag.contains(f.as_str()))
    }
}

/// One ranked chunk in a [`RetrievalResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity between the query and the chunk embedding.
    pub score: f32,
}

/// Ordered chunks returned for one query. Not persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub category_filter: Option<Vec<String>>,
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn empty(query: &str, category_filter: Option<&[String]>) -> Self {
        Self {
            query: query.to_string(),
            category_filter: category_filter.map(|f| f.to_vec()),
            chunks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// `source_file` of every chunk, in rank order.
    pub fn sources(&self) -> Vec<String> {
        self.chunks
            .iter()
            .map(|c| c.chunk.source_file.clone())
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk.text.clone()).collect()
    }
}

/// Stability of repeated retrievals for a single query.
///
/// All stability fields are percentages in `[0, 100]`; the matching drift is
/// `100 - stability`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StabilityReport {
    pub id_stability: f64,
    pub source_stability: f64,
    pub content_stability: f64,
    pub successful_runs: usize,
    pub total_runs: usize,
    /// Sources per successful run, kept for the run-by-run breakdown.
    #[serde(skip)]
    pub run_sources: Vec<Vec<String>>,
}

impl StabilityReport {
    /// Report used when fewer than two runs returned anything.
    pub fn degenerate(successful_runs: usize, total_runs: usize) -> Self {
        Self {
            id_stability: 0.0,
            source_stability: 0.0,
            content_stability: 0.0,
            successful_runs,
            total_runs,
            run_sources: Vec::new(),
        }
    }

    pub fn id_drift(&self) -> f64 {
        round2(100.0 - self.id_stability)
    }

    pub fn source_drift(&self) -> f64 {
        round2(100.0 - self.source_stability)
    }

    pub fn content_drift(&self) -> f64 {
        round2(100.0 - self.content_stability)
    }

    pub fn to_record(&self) -> DriftRecord {
        DriftRecord::from(self)
    }
}

/// Flat, per-query record written to drift analysis files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub id_stability: f64,
    pub id_drift: f64,
    pub source_stability: f64,
    pub source_drift: f64,
    pub content_stability: f64,
    pub content_drift: f64,
    pub successful_runs: usize,
    pub total_runs: usize,
}

impl From<&StabilityReport> for DriftRecord {
    fn from(r: &StabilityReport) -> Self {
        Self {
            id_stability: r.id_stability,
            id_drift: r.id_drift(),
            source_stability: r.source_stability,
            source_drift: r.source_drift(),
            content_stability: r.content_stability,
            content_drift: r.content_drift(),
            successful_runs: r.successful_runs,
            total_runs: r.total_runs,
        }
    }
}

/// Semantic overlap and source diversity of a single retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapReport {
    pub retrieved_count: usize,
    pub unique_sources: usize,
    pub semantic_overlap: f64,
    pub source_diversity: f64,
    pub sources: Vec<String>,
    pub source_distribution: BTreeMap<String, usize>,
}

/// Chunk and source counts for (a category slice of) the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusSummary {
    pub total_chunks: usize,
    pub unique_sources: usize,
}

/// Round to two decimal places, the precision every report uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_tag(tag: &str) -> Chunk {
        Chunk {
            text: "t".into(),
            source_file: "a.pdf".into(),
            source_path: format!("{}/a.pdf", tag),
            page_or_offset: 0,
            category_tag: tag.into(),
            embedding: vec![],
        }
    }

    #[test]
    fn category_match_is_substring() {
        let c = chunk_with_tag("NSF-CISE");
        assert!(c.matches_category(&["NSF".to_string()]));
        assert!(c.matches_category(&["NIH".to_string(), "CISE".to_string()]));
        assert!(!c.matches_category(&["NIH".to_string()]));
        assert!(!c.matches_category(&[]));
    }

    #[test]
    fn untagged_chunk_matches_nothing_nonempty() {
        let c = chunk_with_tag("");
        assert!(!c.matches_category(&["NSF".to_string()]));
    }

    #[test]
    fn drift_is_complement_of_stability() {
        let report = StabilityReport {
            id_stability: 73.33,
            source_stability: 100.0,
            content_stability: 81.37,
            successful_runs: 5,
            total_runs: 5,
            run_sources: vec![],
        };
        let rec = report.to_record();
        assert!((rec.id_drift + rec.id_stability - 100.0).abs() < 0.011);
        assert_eq!(rec.source_drift, 0.0);
        assert!((rec.content_drift - 18.63).abs() < 1e-9);
    }

    #[test]
    fn degenerate_report_has_full_drift() {
        let rec = StabilityReport::degenerate(1, 5).to_record();
        assert_eq!(rec.id_stability, 0.0);
        assert_eq!(rec.id_drift, 100.0);
        assert_eq!(rec.source_drift, 100.0);
        assert_eq!(rec.content_drift, 100.0);
        assert_eq!(rec.successful_runs, 1);
        assert_eq!(rec.total_runs, 5);
    }

    #[test]
    fn record_serializes_expected_field_names() {
        let json = serde_json::to_value(StabilityReport::degenerate(0, 3).to_record()).unwrap();
        for key in [
            "id_stability",
            "id_drift",
            "source_stability",
            "source_drift",
            "content_stability",
            "content_drift",
            "successful_runs",
            "total_runs",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }
}
