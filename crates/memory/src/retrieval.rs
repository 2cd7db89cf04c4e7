//! Similarity ranking over memory entries.
//!
//! Two modes: cosine similarity when the query and the index both carry
//! vectors, and a keyword/recency fallback otherwise.  Neither mode can fail;
//! degenerate input just ranks low.

use std::cmp::Ordering;

use crate::schema::MemoryEntry;

/// Score given to entries that cannot be compared with the query.
pub const UNSCORED: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMode {
    Vector,
    Keyword,
}

#[derive(Debug, Clone)]
pub struct RankedEntry<'a> {
    pub entry: &'a MemoryEntry,
    pub score: f32,
    pub mode: RankMode,
}

/// Cosine similarity in `[-1, 1]`.  Empty, zero-norm or mismatched vectors
/// yield [`UNSCORED`].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return UNSCORED;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return UNSCORED;
    }
    let sim = dot / (mag_a * mag_b);
    if sim.is_finite() { sim.clamp(-1.0, 1.0) } else { UNSCORED }
}

/// Keyword relevance of `entry` to `query`:
/// exact title `3.0`, title substring `2.0`, otherwise the fraction of query
/// words found in title, slug or module.
pub fn keyword_score(entry: &MemoryEntry, query: &str) -> f32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let title = entry.title.trim().to_lowercase();
    if title == query {
        return 3.0;
    }
    if title.contains(&query) {
        return 2.0;
    }

    let words: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {}",
        title,
        entry.slug.to_lowercase(),
        entry.module.to_lowercase()
    );
    let hits = words.iter().filter(|w| haystack.contains(**w)).count();
    hits as f32 / words.len() as f32
}

fn by_score_then_recency(a: &RankedEntry<'_>, b: &RankedEntry<'_>) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.entry.created_at().cmp(&a.entry.created_at()))
}

/// Top `k` entries by cosine similarity to `query`.
pub fn rank_by_vector<'a>(entries: &'a [MemoryEntry], query: &[f32], k: usize) -> Vec<RankedEntry<'a>> {
    let mut ranked: Vec<RankedEntry<'a>> = entries
        .iter()
        .map(|entry| RankedEntry {
            entry,
            score: entry
                .vector
                .as_deref()
                .map(|v| cosine_similarity(v, query))
                .unwrap_or(UNSCORED),
            mode: RankMode::Vector,
        })
        .collect();
    ranked.sort_by(by_score_then_recency);
    ranked.truncate(k);
    ranked
}

/// Top `k` entries by keyword relevance, most recent first among equals.
pub fn rank_by_keyword<'a>(entries: &'a [MemoryEntry], query: &str, k: usize) -> Vec<RankedEntry<'a>> {
    let mut ranked: Vec<RankedEntry<'a>> = entries
        .iter()
        .map(|entry| RankedEntry {
            entry,
            score: keyword_score(entry, query),
            mode: RankMode::Keyword,
        })
        .collect();
    ranked.sort_by(by_score_then_recency);
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn entry(title: &str, vector: Option<Vec<f32>>, created_at: i64) -> MemoryEntry {
        let mut meta = Map::new();
        meta.insert("created_at".into(), Value::from(created_at));
        MemoryEntry {
            item_id: title.to_string(),
            title: title.to_string(),
            slug: kitabite_curriculum::normalize(title),
            module: "grammar".to_string(),
            path: format!("{title}.json"),
            vector,
            meta,
        }
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), UNSCORED);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), UNSCORED);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), UNSCORED);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn vector_ranking_orders_by_similarity() {
        let entries = vec![
            entry("x", Some(vec![1.0, 0.0]), 1),
            entry("y", Some(vec![0.0, 1.0]), 2),
            entry("xy", Some(vec![1.0, 1.0]), 3),
        ];
        let ranked = rank_by_vector(&entries, &[1.0, 0.0], 2);
        let titles: Vec<_> = ranked.iter().map(|r| r.entry.title.as_str()).collect();
        assert_eq!(titles, vec!["x", "xy"]);
        assert!(ranked.iter().all(|r| r.mode == RankMode::Vector));
    }

    #[test]
    fn vectorless_entries_rank_last() {
        let entries = vec![entry("none", None, 10), entry("some", Some(vec![0.0, 1.0]), 1)];
        let ranked = rank_by_vector(&entries, &[1.0, 0.0], 5);
        assert_eq!(ranked[0].entry.title, "some");
        assert_eq!(ranked[1].score, UNSCORED);
    }

    #[test]
    fn keyword_ranking_prefers_title_matches_then_recency() {
        let entries = vec![
            entry("Verb Tenses", None, 30),
            entry("Noun Cases", None, 10),
            entry("Greetings", None, 20),
        ];
        let ranked = rank_by_keyword(&entries, "noun", 3);
        let titles: Vec<_> = ranked.iter().map(|r| r.entry.title.as_str()).collect();
        assert_eq!(titles, vec!["Noun Cases", "Verb Tenses", "Greetings"]);
    }

    #[test]
    fn keyword_score_tiers() {
        let e = entry("Noun Cases", None, 0);
        assert_eq!(keyword_score(&e, "noun cases"), 3.0);
        assert_eq!(keyword_score(&e, "cases"), 2.0);
        assert_eq!(keyword_score(&e, "cases of grammar"), 2.0 / 3.0);
        assert_eq!(keyword_score(&e, "  "), 0.0);
    }
}
