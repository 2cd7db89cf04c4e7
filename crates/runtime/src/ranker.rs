//! Retrieval Ranker: memory search plus lesson loading.
//!
//! Each hit is resolved back to its lesson file and reduced to a compact
//! summary for prompt context.  Hits whose file is gone or unreadable are
//! skipped with a warning.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use kitabite_curriculum::repository::load_lesson_file;
use kitabite_curriculum::{Block, Lesson, Question};
use kitabite_memory::{MemoryEntry, MemoryStore};

use crate::collaborators::Embedder;

const SAMPLE_LEN: usize = 5;
const ASK_SAMPLE_LEN: usize = 6;

/// What the model sees of an earlier lesson while authoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LessonSummary {
    pub id: String,
    pub title: String,
    pub block_histogram: BTreeMap<String, usize>,
    pub sample_block_types: Vec<String>,
    pub sample_quiz_kinds: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representative_question: Option<String>,
}

impl LessonSummary {
    pub fn of(lesson: &Lesson) -> Self {
        Self {
            id: lesson.id.clone(),
            title: lesson.title.clone(),
            block_histogram: lesson
                .block_histogram()
                .into_iter()
                .map(|(kind, n)| (kind.to_string(), n))
                .collect(),
            sample_block_types: lesson
                .blocks
                .iter()
                .take(SAMPLE_LEN)
                .map(|b| b.kind().as_str().to_string())
                .collect(),
            sample_quiz_kinds: lesson
                .quiz_questions()
                .iter()
                .take(SAMPLE_LEN)
                .map(|q| q.kind().as_str().to_string())
                .collect(),
            representative_question: lesson
                .representative_question()
                .map(|q| q.data.question.clone()),
        }
    }
}

/// Richer excerpt used to answer questions about authored content.
#[derive(Debug, Clone, Serialize)]
pub struct AskDocument {
    pub id: String,
    pub title: String,
    pub blocks: Vec<Block>,
    pub quiz_sample: Vec<Question>,
}

impl AskDocument {
    pub fn of(lesson: &Lesson) -> Self {
        Self {
            id: lesson.id.clone(),
            title: lesson.title.clone(),
            blocks: lesson.blocks.iter().take(ASK_SAMPLE_LEN).cloned().collect(),
            quiz_sample: lesson
                .quiz_questions()
                .iter()
                .take(ASK_SAMPLE_LEN)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retrieved {
    pub entry: MemoryEntry,
    pub score: f32,
    pub lesson: Lesson,
}

impl Retrieved {
    pub fn summary(&self) -> LessonSummary {
        LessonSummary::of(&self.lesson)
    }
}

pub struct Retriever<'a> {
    store: &'a MemoryStore,
    embedder: &'a dyn Embedder,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a MemoryStore, embedder: &'a dyn Embedder) -> Self {
        Self { store, embedder }
    }

    /// Up to `k` earlier lessons most relevant to `query`, in rank order.
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<Retrieved> {
        if k == 0 || self.store.is_empty() {
            return Vec::new();
        }
        // Embedding the query is only worth a request when the index can use it.
        let query_vector = if self.store.vector_count() > 0 {
            self.embedder.embed(query).await
        } else {
            None
        };

        let hits = self.store.search(query, query_vector.as_deref(), k);
        let mut retrieved = Vec::with_capacity(hits.len());
        for hit in hits {
            match load_lesson_file(Path::new(&hit.entry.path)).await {
                Ok(lesson) => retrieved.push(Retrieved {
                    entry: hit.entry.clone(),
                    score: hit.score,
                    lesson,
                }),
                Err(err) => {
                    warn!(path = %hit.entry.path, slug = %hit.entry.slug, error = %err, "skipping memory hit");
                }
            }
        }
        debug!(query, k, found = retrieved.len(), "retrieval complete");
        retrieved
    }

    pub async fn summaries(&self, query: &str, k: usize) -> Vec<LessonSummary> {
        self.retrieve(query, k).await.iter().map(Retrieved::summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoEmbeddings;
    use async_trait::async_trait;
    use kitabite_curriculum::{LessonKey, LessonRepository};
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            Some(self.0.clone())
        }
    }

    fn lesson(slug: &str, title: &str) -> Lesson {
        Lesson::from_value(json!({
            "id": slug, "slug": slug, "title": title,
            "blocks": [
                {"type": "text", "data": "intro"},
                {"type": "mc", "data": {"question": "Inline?", "options": ["a", "b"], "answer": 0}},
                {"type": "text", "data": "more"}
            ],
            "quiz": {"questions": [
                {"type": "free-text", "data": {"question": "Quiz one?", "answer": ["x"]}}
            ]}
        }))
        .unwrap()
    }

    async fn seeded(dir: &TempDir) -> MemoryStore {
        let repo = LessonRepository::new(dir.path());
        let mut store = MemoryStore::new();
        for (slug, title, vector) in [
            ("noun-cases", "Noun Cases", vec![1.0, 0.0]),
            ("verb-tenses", "Verb Tenses", vec![0.0, 1.0]),
        ] {
            let key = LessonKey::new("c", "grammar", slug);
            let path = repo.save(&key, &lesson(slug, title)).await.unwrap();
            store.add_item(MemoryEntry::new("c", title, slug, "grammar", path.display().to_string(), Some(vector)));
        }
        store
    }

    #[test]
    fn summary_reduces_lesson() {
        let summary = LessonSummary::of(&lesson("a", "A"));
        assert_eq!(summary.block_histogram.get("text"), Some(&2));
        assert_eq!(summary.block_histogram.get("mc"), Some(&1));
        assert_eq!(summary.sample_block_types, vec!["text", "mc", "text"]);
        assert_eq!(summary.sample_quiz_kinds, vec!["free-text"]);
        assert_eq!(summary.representative_question.as_deref(), Some("Quiz one?"));
    }

    #[tokio::test]
    async fn retrieves_by_vector_and_loads_lessons() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let embedder = FixedEmbedder(vec![0.0, 1.0]);
        let hits = Retriever::new(&store, &embedder).retrieve("anything", 1).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lesson.title, "Verb Tenses");
    }

    #[tokio::test]
    async fn falls_back_to_keywords_without_embeddings() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let hits = Retriever::new(&store, &NoEmbeddings).summaries("noun", 2).await;
        assert_eq!(hits[0].title, "Noun Cases");
    }

    #[tokio::test]
    async fn missing_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded(&dir).await;
        store.add_item(MemoryEntry::new("c", "Noun Gone", "noun-gone", "grammar", "/nope/gone.json", None));
        let hits = Retriever::new(&store, &NoEmbeddings).retrieve("noun", 5).await;
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.entry.slug != "noun-gone"));
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = MemoryStore::new();
        assert!(Retriever::new(&store, &NoEmbeddings).retrieve("noun", 3).await.is_empty());
    }
}
