//! Status overview for the `kb status` command.
//!
//! Prints the ingestion ledger, embedding coverage, and usage counters.
//! Gives quick confidence that ingestion runs and the index are healthy.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::engine::RetrievalEngine;

pub async fn run_status(engine: &RetrievalEngine) -> Result<()> {
    let status = engine.status().await;
    let (total_docs, embedded_docs) = document_counts(engine.pool()).await?;

    let db_size = std::fs::metadata(&engine.config().db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("chat-kb — Index Status");
    println!("======================");
    println!();
    println!("  Database:   {}", engine.config().db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();
    println!("  Documents:  {}", total_docs);
    println!(
        "  Embedded:   {} / {} ({}%)",
        embedded_docs,
        total_docs,
        if total_docs > 0 {
            (embedded_docs * 100) / total_docs
        } else {
            0
        }
    );
    println!(
        "  Last ingest: {}",
        match status.last_ingest_time {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );

    if !status.ingested_files.is_empty() {
        println!();
        println!("  Ingested files:");
        println!("  {:<32} {}", "FILE", "INGESTED");
        println!("  {}", "-".repeat(56));
        for entry in &status.ingested_files {
            println!(
                "  {:<32} {}",
                entry.file_name,
                format_ts_relative(entry.ingested_at)
            );
        }
    }

    println!();
    println!("  Usage (this process):");
    println!("    searches:           {}", status.stats.total_searches);
    println!("    matches returned:   {}", status.stats.total_matches);
    println!("    embedding failures: {}", status.stats.embedding_failures);
    println!();

    Ok(())
}

async fn document_counts(pool: &SqlitePool) -> Result<(i64, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let embedded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?;
    Ok((total, embedded))
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
