//! Core data models used throughout chat-kb.
//!
//! These types represent the documents, ledger entries, and search results
//! that flow through the ingestion and retrieval pipeline.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// A tabular source file discovered in the corpus directory.
#[derive(Debug, Clone)]
pub struct CorpusFile {
    /// File name relative to the corpus directory (e.g. `definitions.csv`).
    pub file_name: String,
    pub path: PathBuf,
    /// Modification time, unix seconds.
    pub modified: i64,
}

/// One retrievable unit, derived from a single source row.
///
/// The id is a SHA-256 over (source file, row index, content), so identical
/// rows always map to the same id and re-ingestion upserts in place.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_file: String,
    pub row_index: i64,
    /// Original column names, JSON array.
    pub columns_json: String,
    /// Normalized `"column: value"` lines, newline-joined.
    pub content: String,
    /// Little-endian f32 bytes; `None` when the embedding provider failed.
    pub embedding: Option<Vec<u8>>,
}

/// Per-source-file bookkeeping of the last ingestion time.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// Unix seconds of the last ingest of this file.
    #[serde(rename = "ingestTime")]
    pub ingested_at: i64,
}

/// Which search path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Vector,
    Text,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Vector => "vector",
            Provenance::Text => "text",
        }
    }
}

/// A ranked result returned from the retrieval engine.
///
/// Scores are comparable only within one provenance: vector scores are
/// boosted cosine similarities in `[0, 1]`, text scores are synthetic rank
/// positions. Callers must not merge them assuming a shared scale.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    #[serde(rename = "similarity")]
    pub score: f64,
    #[serde(rename = "sourceType")]
    pub provenance: Provenance,
}

/// Snapshot of the process-lifetime usage counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_searches: u64,
    pub total_matches: u64,
    pub embedding_failures: u64,
}

/// Live usage counters, owned by a [`crate::engine::RetrievalEngine`]
/// instance so multiple engines can coexist without cross-contamination.
#[derive(Debug, Default)]
pub struct UsageCounters {
    total_searches: AtomicU64,
    total_matches: AtomicU64,
    embedding_failures: AtomicU64,
}

impl UsageCounters {
    pub fn record_search(&self) {
        self.total_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_matches(&self, n: u64) {
        self.total_matches.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_embedding_failure(&self) {
        self.embedding_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageStats {
        UsageStats {
            total_searches: self.total_searches.load(Ordering::Relaxed),
            total_matches: self.total_matches.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
        }
    }
}

/// Response shape of the status API, consumed by the chat layer's
/// monitoring surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    #[serde(rename = "ingestedFiles")]
    pub ingested_files: Vec<LedgerEntry>,
    /// Most recent ingest timestamp across all files, unix seconds.
    #[serde(rename = "lastIngestTime")]
    pub last_ingest_time: Option<i64>,
    pub stats: UsageStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_serializes_lowercase() {
        let r = SearchResult {
            content: "x".to_string(),
            score: 1.0,
            provenance: Provenance::Vector,
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"sourceType\":\"vector\""));
    }

    #[test]
    fn test_counters_snapshot() {
        let c = UsageCounters::default();
        c.record_search();
        c.record_search();
        c.record_matches(3);
        c.record_embedding_failure();

        let s = c.snapshot();
        assert_eq!(s.total_searches, 2);
        assert_eq!(s.total_matches, 3);
        assert_eq!(s.embedding_failures, 1);
    }
}
