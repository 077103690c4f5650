//! Lexical fallback search over the derived full-text index.
//!
//! The FTS5 table mirrors the canonical document rows and can always be
//! reconstructed from them: a query failing with a corruption signature
//! triggers a wholesale rebuild followed by one retry, synchronously inside
//! the triggering call. If the full-text path stays unusable, or the query
//! has no useful tokens, a raw substring scan over document content serves
//! as the last resort. Scores on this path are synthetic rank positions,
//! not comparable to vector similarities.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::migrate;
use crate::models::{Provenance, SearchResult};

/// Tokens shorter than this are noise and dropped from full-text queries.
const MIN_TOKEN_CHARS: usize = 4;

pub async fn text_search(pool: &SqlitePool, query: &str, k: usize) -> Result<Vec<SearchResult>> {
    let tokens = prepare_tokens(query);

    if !tokens.is_empty() {
        let expr = match_expression(&tokens);

        match fts_query(pool, &expr, k).await {
            Ok(contents) => return Ok(synthetic_results(contents)),
            Err(e) if is_corruption_error(&e) => {
                warn!(error = %e, "full-text index corrupted, rebuilding");
                match rebuild_fts(pool).await {
                    Ok(()) => match fts_query(pool, &expr, k).await {
                        Ok(contents) => return Ok(synthetic_results(contents)),
                        Err(e) => {
                            warn!(error = %e, "full-text query failed after rebuild")
                        }
                    },
                    Err(e) => warn!(error = %e, "full-text index rebuild failed"),
                }
            }
            Err(e) => warn!(error = %e, "full-text query failed"),
        }
    }

    substring_scan(pool, query, &tokens, k).await
}

/// Discard the derived index and repopulate it wholesale from the canonical
/// document rows. Its own operation with its own failure mode, so recovery
/// is testable independently of the query path that triggers it.
pub async fn rebuild_fts(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DROP TABLE IF EXISTS documents_fts")
        .execute(pool)
        .await?;
    migrate::create_fts_table(pool).await?;

    let inserted = sqlx::query(
        "INSERT INTO documents_fts (doc_id, content) SELECT id, content FROM documents",
    )
    .execute(pool)
    .await?;

    info!(rows = inserted.rows_affected(), "rebuilt full-text index");
    Ok(())
}

/// Lowercase, split on whitespace, discard noise tokens.
fn prepare_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(|t| t.to_string())
        .collect()
}

/// OR the surviving tokens together as quoted prefix terms.
fn match_expression(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn fts_query(pool: &SqlitePool, expr: &str, k: usize) -> sqlx::Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT content FROM documents_fts WHERE documents_fts MATCH ? ORDER BY rank LIMIT ?",
    )
    .bind(expr)
    .bind(k as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("content")).collect())
}

/// Structural and missing-row errors from the FTS5 extension mark the
/// derived index as corrupted. A dropped table counts too: the index is
/// derived state, and recreating it is always safe.
fn is_corruption_error(e: &sqlx::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("malformed")
        || msg.contains("corrupt")
        || msg.contains("missing")
        || msg.contains("no such table")
}

/// Last resort: case-insensitive substring match over canonical content.
/// OR semantics across the surviving tokens; the whole query becomes the
/// needle when no token survived filtering.
async fn substring_scan(
    pool: &SqlitePool,
    query: &str,
    tokens: &[String],
    k: usize,
) -> Result<Vec<SearchResult>> {
    let rows = sqlx::query("SELECT content FROM documents ORDER BY rowid")
        .fetch_all(pool)
        .await?;

    let needles: Vec<String> = if tokens.is_empty() {
        vec![query.trim().to_lowercase()]
    } else {
        tokens.to_vec()
    };

    let contents: Vec<String> = rows
        .iter()
        .map(|row| row.get::<String, _>("content"))
        .filter(|content| {
            let lowered = content.to_lowercase();
            needles.iter().any(|needle| lowered.contains(needle))
        })
        .take(k)
        .collect();

    Ok(synthetic_results(contents))
}

/// Rank position `i` (0-based) yields score `1 − 0.1·i`.
fn synthetic_results(contents: Vec<String>) -> Vec<SearchResult> {
    contents
        .into_iter()
        .enumerate()
        .map(|(i, content)| SearchResult {
            content,
            score: 1.0 - 0.1 * i as f64,
            provenance: Provenance::Text,
        })
        .collect()
}
