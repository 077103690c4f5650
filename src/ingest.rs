//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow from tabular source files to stored documents:
//! corpus scan → change detection against the ledger → row transform →
//! normalization → embedding (non-fatal on failure) → upsert. Document ids
//! are content-addressed, so re-ingesting unchanged rows is a no-op.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::corpus;
use crate::embedding::{self, EmbeddingProvider};
use crate::migrate;
use crate::models::{CorpusFile, Document, LedgerEntry, UsageCounters};
use crate::normalize::normalize;

/// Result of [`initialize`]: what startup did and what is retrievable.
#[derive(Debug, Clone, Copy)]
pub struct InitOutcome {
    pub full_rebuild: bool,
    pub files_seen: usize,
    pub files_failed: usize,
    /// Total stored documents after initialization.
    pub documents: i64,
}

impl InitOutcome {
    /// Whether any retrievable content exists.
    pub fn has_content(&self) -> bool {
        self.documents > 0
    }
}

/// Result of a steady-state [`refresh`] pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOutcome {
    pub files_added: usize,
    pub files_reingested: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub documents_upserted: u64,
    pub documents_pruned: u64,
}

/// Startup policy: full rebuild when the persisted index is absent or any
/// source file is newer than the index itself; otherwise load the existing
/// store without re-parsing and reconstruct the ledger from current file
/// timestamps.
pub async fn initialize(
    pool: &SqlitePool,
    config: &Config,
    provider: &dyn EmbeddingProvider,
    counters: &UsageCounters,
) -> Result<InitOutcome> {
    let files = corpus::scan_corpus(config)?;

    let doc_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let newest_ledger: Option<i64> = sqlx::query_scalar("SELECT MAX(ingested_at) FROM ingest_ledger")
        .fetch_one(pool)
        .await?;

    let stale = doc_count == 0
        || files
            .iter()
            .any(|f| f.modified > newest_ledger.unwrap_or(i64::MIN));

    let mut files_failed = 0usize;

    if stale {
        info!(files = files.len(), "index absent or stale, rebuilding from source files");
        clear_store(pool).await?;

        let now = chrono::Utc::now().timestamp();
        for file in &files {
            match ingest_file(pool, config, provider, counters, file).await {
                Ok(ids) => {
                    debug!(file = %file.file_name, rows = ids.len(), "ingested");
                    set_ledger(pool, &file.file_name, now).await?;
                }
                Err(e) => {
                    warn!(file = %file.file_name, error = %e, "failed to ingest source file");
                    files_failed += 1;
                }
            }
        }
    } else {
        // Ledger mirrors what is on disk right now; stored documents are
        // reused as-is.
        sqlx::query("DELETE FROM ingest_ledger").execute(pool).await?;
        for file in &files {
            set_ledger(pool, &file.file_name, file.modified).await?;
        }
    }

    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;

    Ok(InitOutcome {
        full_rebuild: stale,
        files_seen: files.len(),
        files_failed,
        documents,
    })
}

/// Steady-state refresh: ingest new files, drop ledger entries for files
/// that disappeared (their documents are retained), and re-ingest files
/// whose modification time exceeds their ledger timestamp. Re-ingestion
/// prunes rows of that file whose ids the pass did not produce, so changed
/// rows do not leave orphans behind.
pub async fn refresh(
    pool: &SqlitePool,
    config: &Config,
    provider: &dyn EmbeddingProvider,
    counters: &UsageCounters,
) -> Result<RefreshOutcome> {
    let files = corpus::scan_corpus(config)?;
    let ledger = load_ledger(pool).await?;
    let ledger_map: HashMap<&str, i64> = ledger
        .iter()
        .map(|e| (e.file_name.as_str(), e.ingested_at))
        .collect();
    let on_disk: HashSet<&str> = files.iter().map(|f| f.file_name.as_str()).collect();

    let mut outcome = RefreshOutcome::default();

    for entry in &ledger {
        if !on_disk.contains(entry.file_name.as_str()) {
            debug!(file = %entry.file_name, "source file disappeared, dropping ledger entry");
            sqlx::query("DELETE FROM ingest_ledger WHERE file_name = ?")
                .bind(&entry.file_name)
                .execute(pool)
                .await?;
            outcome.files_removed += 1;
        }
    }

    for file in &files {
        match ledger_map.get(file.file_name.as_str()) {
            None => match ingest_file(pool, config, provider, counters, file).await {
                Ok(ids) => {
                    set_ledger(pool, &file.file_name, chrono::Utc::now().timestamp()).await?;
                    outcome.files_added += 1;
                    outcome.documents_upserted += ids.len() as u64;
                }
                Err(e) => {
                    warn!(file = %file.file_name, error = %e, "failed to ingest new source file");
                    outcome.files_failed += 1;
                }
            },
            Some(&ingested_at) if file.modified > ingested_at => {
                match ingest_file(pool, config, provider, counters, file).await {
                    Ok(ids) => {
                        let pruned = prune_stale(pool, &file.file_name, &ids).await?;
                        set_ledger(pool, &file.file_name, chrono::Utc::now().timestamp()).await?;
                        outcome.files_reingested += 1;
                        outcome.documents_upserted += ids.len() as u64;
                        outcome.documents_pruned += pruned;
                    }
                    Err(e) => {
                        warn!(file = %file.file_name, error = %e, "failed to re-ingest changed file");
                        outcome.files_failed += 1;
                    }
                }
            }
            Some(_) => {}
        }
    }

    Ok(outcome)
}

/// Ingest one tabular file, one document per row. Returns the ids the pass
/// produced. A parse error aborts this file; rows already written remain.
async fn ingest_file(
    pool: &SqlitePool,
    config: &Config,
    provider: &dyn EmbeddingProvider,
    counters: &UsageCounters,
    file: &CorpusFile,
) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .from_path(&file.path)
        .with_context(|| format!("failed to open {}", file.file_name))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read header row of {}", file.file_name))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let columns_json = serde_json::to_string(&headers)?;

    let now = chrono::Utc::now().timestamp();
    let mut ids = Vec::new();

    for (row_index, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("malformed row {} in {}", row_index, file.file_name))?;

        let content = row_content(&headers, &record);
        let id = document_id(&file.file_name, row_index, &content);

        // Embedding failures are non-fatal: the document is stored without a
        // vector and remains reachable through the lexical path.
        let blob = match embedding::embed_text(provider, &config.embedding, &content).await {
            Ok(vec) => Some(embedding::vec_to_blob(&vec)),
            Err(e) => {
                warn!(file = %file.file_name, row = row_index, error = %e, "embedding failed");
                counters.record_embedding_failure();
                None
            }
        };

        let document = Document {
            id,
            source_file: file.file_name.clone(),
            row_index: row_index as i64,
            columns_json: columns_json.clone(),
            content,
            embedding: blob,
        };
        upsert_document(pool, &document, now).await?;

        ids.push(document.id);
    }

    Ok(ids)
}

/// Build document content for one row: normalized `"column: value"` lines
/// in the row's original column order.
pub fn row_content(headers: &[String], record: &csv::StringRecord) -> String {
    let lines: Vec<String> = headers
        .iter()
        .zip(record.iter())
        .map(|(header, value)| format!("{}: {}", header, value))
        .collect();
    normalize(&lines.join("\n"))
}

/// Content-addressed document id: SHA-256 over (file name, row index,
/// formatted content). Identical inputs always produce the same id, and
/// any content change produces a different one.
pub fn document_id(file_name: &str, row_index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_name.as_bytes());
    hasher.update((row_index as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn upsert_document(pool: &SqlitePool, document: &Document, ingested_at: i64) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, source_file, row_index, columns_json, content, embedding, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            source_file = excluded.source_file,
            row_index = excluded.row_index,
            columns_json = excluded.columns_json,
            content = excluded.content,
            embedding = excluded.embedding,
            ingested_at = excluded.ingested_at
        "#,
    )
    .bind(&document.id)
    .bind(&document.source_file)
    .bind(document.row_index)
    .bind(&document.columns_json)
    .bind(&document.content)
    .bind(document.embedding.as_deref())
    .bind(ingested_at)
    .execute(&mut *tx)
    .await?;

    // Mirror into the derived full-text index
    sqlx::query("DELETE FROM documents_fts WHERE doc_id = ?")
        .bind(&document.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO documents_fts (doc_id, content) VALUES (?, ?)")
        .bind(&document.id)
        .bind(&document.content)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Delete rows of `source_file` whose ids were not produced by the current
/// ingest pass. Returns the number of rows pruned.
async fn prune_stale(pool: &SqlitePool, source_file: &str, keep_ids: &[String]) -> Result<u64> {
    let keep: HashSet<&str> = keep_ids.iter().map(|s| s.as_str()).collect();

    let existing: Vec<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source_file = ?")
            .bind(source_file)
            .fetch_all(pool)
            .await?;

    let mut pruned = 0u64;
    for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents_fts WHERE doc_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        pruned += 1;
    }

    Ok(pruned)
}

async fn clear_store(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM documents").execute(pool).await?;
    sqlx::query("DELETE FROM ingest_ledger").execute(pool).await?;

    // A corrupted FTS table can refuse a plain DELETE; fall back to a
    // wholesale drop + recreate.
    if sqlx::query("DELETE FROM documents_fts")
        .execute(pool)
        .await
        .is_err()
    {
        sqlx::query("DROP TABLE IF EXISTS documents_fts")
            .execute(pool)
            .await?;
        migrate::create_fts_table(pool).await?;
    }

    Ok(())
}

async fn set_ledger(pool: &SqlitePool, file_name: &str, ingested_at: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_ledger (file_name, ingested_at) VALUES (?, ?)
        ON CONFLICT(file_name) DO UPDATE SET ingested_at = excluded.ingested_at
        "#,
    )
    .bind(file_name)
    .bind(ingested_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_ledger(pool: &SqlitePool) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query("SELECT file_name, ingested_at FROM ingest_ledger ORDER BY file_name")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| LedgerEntry {
            file_name: row.get("file_name"),
            ingested_at: row.get("ingested_at"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_deterministic() {
        let a = document_id("definitions.csv", 0, "term: latency");
        let b = document_id("definitions.csv", 0, "term: latency");
        assert_eq!(a, b);
    }

    #[test]
    fn test_document_id_changes_with_content() {
        let a = document_id("definitions.csv", 0, "term: latency");
        let b = document_id("definitions.csv", 0, "term: throughput");
        assert_ne!(a, b);
    }

    #[test]
    fn test_document_id_changes_with_file_and_row() {
        let base = document_id("definitions.csv", 0, "term: latency");
        assert_ne!(base, document_id("notes.csv", 0, "term: latency"));
        assert_ne!(base, document_id("definitions.csv", 1, "term: latency"));
    }

    #[test]
    fn test_row_content_format() {
        let headers = vec!["term".to_string(), "meaning".to_string()];
        let record = csv::StringRecord::from(vec!["latency", "time to first byte"]);
        assert_eq!(
            row_content(&headers, &record),
            "term: latency\nmeaning: time to first byte"
        );
    }

    #[test]
    fn test_row_content_is_normalized() {
        let headers = vec!["term".to_string()];
        // Decomposed é plus a zero-width space
        let record = csv::StringRecord::from(vec!["cafe\u{0301}\u{200B}"]);
        assert_eq!(row_content(&headers, &record), "term: caf\u{00E9}");
    }

    #[test]
    fn test_equal_canonical_inputs_share_an_id() {
        let headers = vec!["term".to_string()];
        let decomposed = csv::StringRecord::from(vec!["cafe\u{0301}"]);
        let precomposed = csv::StringRecord::from(vec!["caf\u{00E9}"]);

        let a = document_id("definitions.csv", 0, &row_content(&headers, &decomposed));
        let b = document_id("definitions.csv", 0, &row_content(&headers, &precomposed));
        assert_eq!(a, b);
    }
}
