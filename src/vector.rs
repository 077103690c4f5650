//! Vector similarity search over stored document embeddings.
//!
//! A full linear scan: every document with an embedding is compared against
//! the query vector by cosine similarity, clamped into `[0, 1]`. Rows from
//! the configured authoritative file get a fixed multiplicative boost
//! (capped at 1.0) so canonical definitions outrank incidental mentions of
//! the same term. Documents without an embedding are simply invisible here.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::models::{Provenance, SearchResult};

/// A stored document eligible for vector ranking.
#[derive(Debug, Clone)]
pub struct EmbeddedDoc {
    pub source_file: String,
    pub content: String,
    pub vector: Vec<f32>,
}

/// Rank candidates against a query vector.
///
/// Pure over its inputs: scores are cosine similarities clamped to
/// `[0, 1]`, boosted for the authoritative file and capped at 1.0, sorted
/// descending with a stable sort so ties keep candidate order.
pub fn rank_embedded(
    candidates: &[EmbeddedDoc],
    query_vec: &[f32],
    authoritative_file: &str,
    boost_factor: f64,
    k: usize,
) -> Vec<SearchResult> {
    let mut scored: Vec<(f64, &EmbeddedDoc)> = candidates
        .iter()
        .map(|doc| {
            let similarity = f64::from(cosine_similarity(query_vec, &doc.vector)).clamp(0.0, 1.0);
            let score = if doc.source_file == authoritative_file {
                (similarity * boost_factor).min(1.0)
            } else {
                similarity
            };
            (score, doc)
        })
        .collect();

    // Stable sort: equal scores keep insertion order
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(score, doc)| SearchResult {
            content: doc.content.clone(),
            score,
            provenance: Provenance::Vector,
        })
        .collect()
}

/// Load every embedded document in insertion order and rank it against the
/// query vector. The caller embeds the query; an unreachable provider is
/// its failure to handle, not ours.
pub async fn search_with_vector(
    pool: &SqlitePool,
    config: &Config,
    query_vec: &[f32],
    k: usize,
) -> Result<Vec<SearchResult>> {
    let rows = sqlx::query(
        "SELECT source_file, content, embedding FROM documents WHERE embedding IS NOT NULL ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    let candidates: Vec<EmbeddedDoc> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            EmbeddedDoc {
                source_file: row.get("source_file"),
                content: row.get("content"),
                vector: blob_to_vec(&blob),
            }
        })
        .collect();

    Ok(rank_embedded(
        &candidates,
        query_vec,
        &config.corpus.authoritative_file,
        config.retrieval.boost_factor,
        k,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source_file: &str, content: &str, vector: Vec<f32>) -> EmbeddedDoc {
        EmbeddedDoc {
            source_file: source_file.to_string(),
            content: content.to_string(),
            vector,
        }
    }

    #[test]
    fn test_ranked_descending_within_unit_interval() {
        let candidates = vec![
            doc("notes.csv", "a", vec![1.0, 0.0]),
            doc("notes.csv", "b", vec![0.7, 0.7]),
            doc("notes.csv", "c", vec![0.0, 1.0]),
        ];
        let results = rank_embedded(&candidates, &[1.0, 0.0], "definitions.csv", 1.2, 10);

        assert_eq!(results.len(), 3);
        for window in results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for r in &results {
            assert!((0.0..=1.0).contains(&r.score), "score out of range: {}", r.score);
            assert_eq!(r.provenance, Provenance::Vector);
        }
    }

    #[test]
    fn test_truncates_to_k() {
        let candidates: Vec<EmbeddedDoc> = (0..10)
            .map(|i| doc("notes.csv", &format!("doc {}", i), vec![1.0, 0.0]))
            .collect();
        let results = rank_embedded(&candidates, &[1.0, 0.0], "definitions.csv", 1.2, 3);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_negative_similarity_clamped_to_zero() {
        let candidates = vec![doc("notes.csv", "opposite", vec![-1.0, 0.0])];
        let results = rank_embedded(&candidates, &[1.0, 0.0], "definitions.csv", 1.2, 1);
        assert_eq!(results[0].score, 0.0);
    }

    #[test]
    fn test_boost_favors_authoritative_source_on_ties() {
        // Identical vectors, so raw similarity ties; the glossary row wins.
        let candidates = vec![
            doc("notes.csv", "caching mentioned in passing", vec![0.6, 0.8]),
            doc("definitions.csv", "caching: storing results for reuse", vec![0.6, 0.8]),
        ];
        let results = rank_embedded(&candidates, &[0.6, 0.8], "definitions.csv", 1.2, 2);
        assert!(results[0].content.starts_with("caching: storing"));
    }

    #[test]
    fn test_boost_never_exceeds_one() {
        let candidates = vec![doc("definitions.csv", "exact match", vec![1.0, 0.0])];
        let results = rank_embedded(&candidates, &[1.0, 0.0], "definitions.csv", 1.2, 1);
        assert!(results[0].score <= 1.0);
    }

    #[test]
    fn test_boost_applies_only_to_authoritative_file() {
        let candidates = vec![
            doc("notes.csv", "other", vec![0.6, 0.8]),
            doc("definitions.csv", "glossary", vec![0.6, 0.8]),
        ];
        let plain = rank_embedded(&candidates, &[1.0, 0.0], "definitions.csv", 1.2, 2);
        // similarity for both is 0.6; only the glossary row is boosted
        let glossary = plain.iter().find(|r| r.content == "glossary").unwrap();
        let other = plain.iter().find(|r| r.content == "other").unwrap();
        assert!((glossary.score - 0.72).abs() < 1e-9);
        assert!((other.score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let candidates = vec![
            doc("notes.csv", "first", vec![1.0, 0.0]),
            doc("notes.csv", "second", vec![1.0, 0.0]),
            doc("notes.csv", "third", vec![1.0, 0.0]),
        ];
        let results = rank_embedded(&candidates, &[1.0, 0.0], "definitions.csv", 1.2, 3);
        let order: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_empty_candidates_empty_results() {
        let results = rank_embedded(&[], &[1.0, 0.0], "definitions.csv", 1.2, 5);
        assert!(results.is_empty());
    }
}
