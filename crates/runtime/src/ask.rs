use tracing::info;

use kitabite_memory::MemoryStore;

use crate::collaborators::{ChatModel, Embedder, ReplyFormat};
use crate::error::AuthoringError;
use crate::prompt_builder::{ask_system_prompt, ask_user_prompt};
use crate::ranker::{AskDocument, Retriever};

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Titles of the lessons the answer was grounded on, in rank order.
    pub sources: Vec<String>,
}

/// Answer `question` from the `k` most relevant authored lessons.
pub async fn ask(
    model: &dyn ChatModel,
    embedder: &dyn Embedder,
    store: &MemoryStore,
    style_guide: &str,
    question: &str,
    k: usize,
) -> Result<Answer, AuthoringError> {
    let retrieved = Retriever::new(store, embedder).retrieve(question, k).await;
    let documents: Vec<AskDocument> = retrieved.iter().map(|r| AskDocument::of(&r.lesson)).collect();
    let sources = retrieved.iter().map(|r| r.lesson.title.clone()).collect();

    let text = model
        .chat(&ask_system_prompt(style_guide), &ask_user_prompt(question, &documents), ReplyFormat::Text)
        .await
        .map_err(|err| AuthoringError::from_llm("ask", err))?;
    info!(documents = documents.len(), "question answered");
    Ok(Answer { text, sources })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NoEmbeddings;
    use async_trait::async_trait;
    use kitabite_curriculum::{Lesson, LessonKey, LessonRepository};
    use kitabite_llm::LlmError;
    use kitabite_memory::MemoryEntry;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct EchoModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn chat(&self, _system: &str, user: &str, format: ReplyFormat) -> Result<String, LlmError> {
            assert_eq!(format, ReplyFormat::Text);
            self.prompts.lock().unwrap().push(user.to_string());
            Ok("The genitive follows a preposition.".to_string())
        }
    }

    #[tokio::test]
    async fn answers_from_retrieved_lessons() {
        let dir = TempDir::new().unwrap();
        let repo = LessonRepository::new(dir.path());
        let lesson = Lesson::from_value(json!({
            "id": "cases", "slug": "cases", "title": "Noun Cases",
            "blocks": [{"type": "text", "data": "Genitive after prepositions."}]
        }))
        .unwrap();
        let path = repo.save(&LessonKey::new("c", "nouns", "cases"), &lesson).await.unwrap();

        let mut store = MemoryStore::new();
        store.add_item(MemoryEntry::new("c", "Noun Cases", "cases", "nouns", path.display().to_string(), None));
        store.add_item(MemoryEntry::new("c", "Nouns Lost", "lost", "nouns", "/missing.json", None));

        let model = EchoModel::default();
        let answer = ask(&model, &NoEmbeddings, &store, "", "noun cases?", 6).await.unwrap();
        assert_eq!(answer.sources, vec!["Noun Cases"]);
        assert!(answer.text.contains("genitive"));
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Genitive after prepositions."));
    }
}
