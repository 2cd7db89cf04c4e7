//! One lesson through GENERATING → SAVED → INDEXED.
//!
//! Shared by `author-one` and every batch leaf.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use kitabite_config::AppConfig;
use kitabite_curriculum::{Lesson, LessonKey, LessonRepository, normalize};
use kitabite_llm::extract_json_output;
use kitabite_memory::MemoryStore;

use crate::collaborators::{ChatModel, Embedder, ReplyFormat};
use crate::error::AuthoringError;
use crate::indexer::index_lesson;
use crate::prompt_builder::{LessonRequest, lesson_system_prompt, lesson_user_prompt};
use crate::ranker::Retriever;

/// Settings fixed for a whole authoring session.
#[derive(Debug, Clone)]
pub struct AuthoringContext {
    pub curriculum_id: String,
    pub source_language: String,
    pub target_language: String,
    pub style_guide: String,
    pub repo: LessonRepository,
    pub index_path: PathBuf,
    pub neighbor_count: usize,
}

impl AuthoringContext {
    /// Resolve languages and curriculum id from `config` and read the style
    /// guide.  An absent style file is an empty guide.
    pub async fn from_config(config: &AppConfig, curriculum_flag: Option<&str>) -> Result<Self> {
        let style_path = config.paths.style_path();
        let style_guide = match tokio::fs::read_to_string(&style_path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %style_path.display(), "no style guide; continuing without one");
                String::new()
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading style guide {}", style_path.display()));
            }
        };
        Ok(Self {
            curriculum_id: config.curriculum_id(curriculum_flag),
            source_language: config.curriculum.source_language.clone(),
            target_language: config.curriculum.target_language.clone(),
            style_guide,
            repo: LessonRepository::new(config.paths.generated_path()),
            index_path: config.paths.index_path(),
            neighbor_count: config.batch.neighbor_count,
        })
    }

    pub fn key_for(&self, target: &LessonTarget) -> LessonKey {
        LessonKey::new(&self.curriculum_id, &target.module_slug, &target.lesson_slug)
    }
}

/// A lesson to author, as named in the curriculum or on the command line.
#[derive(Debug, Clone)]
pub struct LessonTarget {
    pub module_title: String,
    pub module_slug: String,
    pub lesson_title: String,
    pub lesson_slug: String,
    pub brief: Option<String>,
}

impl LessonTarget {
    /// Slugs are normalised; an empty lesson slug falls back to the title.
    pub fn new(module_title: &str, lesson_title: &str, lesson_slug: Option<&str>, brief: Option<String>) -> Self {
        let slug_source = lesson_slug.filter(|s| !s.trim().is_empty()).unwrap_or(lesson_title);
        Self {
            module_title: module_title.to_string(),
            module_slug: normalize(module_title),
            lesson_title: lesson_title.to_string(),
            lesson_slug: normalize(slug_source),
            brief,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthoredLesson {
    pub key: LessonKey,
    pub path: PathBuf,
    pub lesson: Lesson,
}

/// Turn a model reply into a lesson.  Fenced or wrapped JSON is extracted
/// first; a missing `slug` is filled in from `slug`.
pub fn parse_lesson_reply(slug: &str, raw: &str) -> Result<Lesson, AuthoringError> {
    let value: Value = extract_json_output(raw).ok_or_else(|| AuthoringError::Generation {
        slug: slug.to_string(),
        reason: "model did not return valid JSON".to_string(),
        raw: Some(raw.to_string()),
    })?;
    let mut lesson = Lesson::from_value(value).map_err(|err| AuthoringError::Generation {
        slug: slug.to_string(),
        reason: err.to_string(),
        raw: Some(raw.to_string()),
    })?;
    if lesson.slug.trim().is_empty() {
        lesson.slug = slug.to_string();
    }
    Ok(lesson)
}

/// Ask the model for one lesson and validate the reply.
pub async fn generate_lesson(
    ctx: &AuthoringContext,
    model: &dyn ChatModel,
    embedder: &dyn Embedder,
    store: &MemoryStore,
    target: &LessonTarget,
) -> Result<Lesson, AuthoringError> {
    let neighbors = Retriever::new(store, embedder)
        .summaries(&target.lesson_title, ctx.neighbor_count)
        .await;
    let request = LessonRequest {
        module_title: target.module_title.clone(),
        lesson_title: target.lesson_title.clone(),
        lesson_slug: target.lesson_slug.clone(),
        brief: target.brief.clone(),
        source_language: ctx.source_language.clone(),
        target_language: ctx.target_language.clone(),
        style_guide: ctx.style_guide.clone(),
        neighbors,
    };
    let raw = model
        .chat(&lesson_system_prompt(&request), &lesson_user_prompt(&request), ReplyFormat::Json)
        .await
        .map_err(|err| AuthoringError::from_llm(&target.lesson_slug, err))?;
    parse_lesson_reply(&target.lesson_slug, &raw)
}

/// Save a generated lesson and index it.  A failed index write leaves the
/// lesson on disk and reports [`AuthoringError::Index`].
pub async fn persist_lesson(
    ctx: &AuthoringContext,
    embedder: &dyn Embedder,
    store: &mut MemoryStore,
    target: &LessonTarget,
    lesson: Lesson,
) -> Result<AuthoredLesson, AuthoringError> {
    let key = ctx.key_for(target);
    let path = ctx
        .repo
        .save(&key, &lesson)
        .await
        .map_err(|err| AuthoringError::Storage {
            slug: key.lesson_slug.clone(),
            reason: format!("{err:#}"),
        })?;

    index_lesson(store, &ctx.index_path, embedder, &key, &target.module_title, &lesson, &path)
        .await
        .map_err(|err| AuthoringError::Index {
            slug: key.lesson_slug.clone(),
            reason: format!("{err:#}"),
        })?;

    Ok(AuthoredLesson {
        key,
        path,
        lesson,
    })
}

/// Author a single lesson outside a batch.
pub async fn author_one(
    ctx: &AuthoringContext,
    model: &dyn ChatModel,
    embedder: &dyn Embedder,
    store: &mut MemoryStore,
    target: &LessonTarget,
) -> Result<AuthoredLesson, AuthoringError> {
    let lesson = generate_lesson(ctx, model, embedder, store, target).await?;
    let authored = persist_lesson(ctx, embedder, store, target, lesson).await?;
    info!(key = %authored.key, path = %authored.path.display(), "lesson authored");
    Ok(authored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fills_missing_slug_and_unwraps_fences() {
        let raw = "```json\n{\"id\":\"x\",\"title\":\"X\",\"blocks\":[{\"type\":\"text\",\"data\":\"hi\"}]}\n```";
        let lesson = parse_lesson_reply("lesson-x", raw).unwrap();
        assert_eq!(lesson.slug, "lesson-x");
        assert_eq!(lesson.blocks.len(), 1);
    }

    #[test]
    fn parse_keeps_raw_output_on_failure() {
        let err = parse_lesson_reply("a", "I cannot do that").unwrap_err();
        assert_eq!(err.raw_output(), Some("I cannot do that"));
        assert!(!err.is_fatal());

        let err = parse_lesson_reply("a", r#"{"id":"a","title":"A"}"#).unwrap_err();
        assert!(err.to_string().contains("blocks"));

        let err = parse_lesson_reply(
            "a",
            r#"{"id":"a","title":"A","blocks":[{"type":"video","data":"v.mp4"}]}"#,
        )
        .unwrap_err();
        assert!(err.raw_output().is_some());
    }

    #[test]
    fn target_slugs_are_normalised() {
        let target = LessonTarget::new("Noun Cases", "The Genitive", None, None);
        assert_eq!(target.module_slug, "noun-cases");
        assert_eq!(target.lesson_slug, "the-genitive");
        let explicit = LessonTarget::new("Nouns", "Whatever", Some("Nouns Cases 301"), None);
        assert_eq!(explicit.lesson_slug, "nouns-cases-301");
    }
}
