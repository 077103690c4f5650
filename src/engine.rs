//! Retrieval facade: the single entry point the chat layer talks to.
//!
//! Owns the store, the embedding provider, the usage counters, and the
//! sticky search-mode flag. `search` and `status` are total with respect to
//! failure: whatever breaks internally, the caller gets a value back and
//! the user-facing chat flow degrades instead of erroring.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::fts;
use crate::ingest::{self, InitOutcome, RefreshOutcome};
use crate::migrate;
use crate::models::{EngineStatus, SearchResult, UsageCounters, UsageStats};
use crate::normalize::normalize;
use crate::vector;

/// Which search path the engine currently prefers.
///
/// A single one-way transition: the first query-embedding failure moves the
/// engine to `TextOnly` for the remainder of the process lifetime. There is
/// no automatic reset; reopening the vector path requires a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    VectorPreferred,
    TextOnly,
}

pub struct RetrievalEngine {
    pool: SqlitePool,
    config: Config,
    provider: Box<dyn EmbeddingProvider>,
    counters: UsageCounters,
    text_only: AtomicBool,
    init: OnceCell<InitOutcome>,
}

impl RetrievalEngine {
    /// Open the store (creating the schema if needed) and set up the
    /// configured embedding provider.
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let provider = embedding::create_provider(&config.embedding)?;

        Ok(Self {
            pool,
            config,
            provider,
            counters: UsageCounters::default(),
            text_only: AtomicBool::new(false),
            init: OnceCell::new(),
        })
    }

    /// Scan the corpus and build or reuse the persisted index.
    ///
    /// Memoized: the first successful outcome is cached for the lifetime of
    /// the engine, and concurrent callers share one in-flight attempt
    /// instead of racing to rebuild independently.
    pub async fn initialize(&self) -> Result<InitOutcome> {
        self.init
            .get_or_try_init(|| {
                ingest::initialize(
                    &self.pool,
                    &self.config,
                    self.provider.as_ref(),
                    &self.counters,
                )
            })
            .await
            .copied()
    }

    /// Steady-state re-scan of the corpus directory.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        ingest::refresh(
            &self.pool,
            &self.config,
            self.provider.as_ref(),
            &self.counters,
        )
        .await
    }

    /// Similarity search used to enrich prompts. Never errors: any internal
    /// failure yields an empty list.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        self.counters.record_search();

        let results = match self.search_inner(query, limit).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "search failed, returning no results");
                Vec::new()
            }
        };

        self.counters.record_matches(results.len() as u64);
        results
    }

    async fn search_inner(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        if self.mode() == SearchMode::VectorPreferred {
            let normalized = normalize(trimmed);
            match embedding::embed_text(self.provider.as_ref(), &self.config.embedding, &normalized)
                .await
            {
                Ok(query_vec) => {
                    return vector::search_with_vector(&self.pool, &self.config, &query_vec, limit)
                        .await
                }
                Err(e) => {
                    warn!(error = %e, "query embedding failed, routing to text search for the rest of this process");
                    self.counters.record_embedding_failure();
                    self.trip_breaker();
                }
            }
        }

        fts::text_search(&self.pool, trimmed, limit).await
    }

    /// Ledger, most recent ingest time, and usage counters, for an external
    /// monitoring surface. Total: an unusable store yields empty values.
    pub async fn status(&self) -> EngineStatus {
        let ingested_files = match ingest::load_ledger(&self.pool).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to load ingestion ledger");
                Vec::new()
            }
        };

        let last_ingest_time = ingested_files.iter().map(|e| e.ingested_at).max();

        EngineStatus {
            ingested_files,
            last_ingest_time,
            stats: self.counters.snapshot(),
        }
    }

    pub fn mode(&self) -> SearchMode {
        if self.text_only.load(Ordering::Relaxed) {
            SearchMode::TextOnly
        } else {
            SearchMode::VectorPreferred
        }
    }

    fn trip_breaker(&self) {
        self.text_only.store(true, Ordering::Relaxed);
    }

    pub fn stats(&self) -> UsageStats {
        self.counters.snapshot()
    }

    /// Direct store access, for maintenance and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
