//! Reassemble persisted lessons into one curriculum-shaped document.
//!
//! Walks the skeleton read-only, replacing each lesson placeholder with the
//! stored payload.  Missing or unreadable lessons are reported and omitted so
//! a partially authored curriculum can still be bundled.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::lesson::Lesson;
use crate::repository::{LessonKey, LessonRepository};
use crate::skeleton::CurriculumSkeleton;
use crate::slug::normalize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundledCurriculum {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        rename = "languageOfInstruction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub language_of_instruction: Option<String>,
    #[serde(rename = "targetLanguage", default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    pub levels: Vec<BundledLevel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundledLevel {
    pub id: String,
    pub title: String,
    pub modules: Vec<BundledModule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundledModule {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub lessons: Vec<Lesson>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A lesson leaf that could not be included.
#[derive(Debug, Clone)]
pub struct MissingLesson {
    pub key: LessonKey,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BundleReport {
    pub document: BundledCurriculum,
    pub included: usize,
    pub missing: Vec<MissingLesson>,
}

impl BundleReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Hands out identifiers unique within one bundle run.  The first claimant
/// of a base id keeps it; later ones get `-<n>` suffixes, so repeated bundling
/// of the same skeleton yields the same ids.
#[derive(Debug, Default)]
struct IdAllocator {
    seen: HashSet<String>,
}

impl IdAllocator {
    fn claim(&mut self, base: String) -> String {
        if self.seen.insert(base.clone()) {
            return base;
        }
        let mut n = self.seen.len() + 1;
        loop {
            let candidate = format!("{base}-{n}");
            if self.seen.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn level_base_id(id: Option<&str>, title: &str, index: usize) -> String {
    match id {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ if !title.trim().is_empty() => normalize(title),
        _ => format!("level-{}", index + 1),
    }
}

fn module_base_id(id: Option<&str>, slug: Option<&str>, title: &str, index: usize) -> String {
    match (id, slug) {
        (Some(id), _) if !id.trim().is_empty() => id.to_string(),
        (_, Some(slug)) if !slug.trim().is_empty() => normalize(slug),
        _ if !title.trim().is_empty() => normalize(title),
        _ => format!("module-{}", index + 1),
    }
}

/// Assemble the curriculum `curriculum_id` from `repo` following `skeleton`.
pub async fn bundle(
    skeleton: &CurriculumSkeleton,
    repo: &LessonRepository,
    curriculum_id: &str,
) -> Result<BundleReport> {
    let base_dir = repo.curriculum_dir(curriculum_id);
    if !base_dir.is_dir() {
        bail!(
            "no generated lessons found for curriculum_id={curriculum_id} under {}",
            base_dir.display()
        );
    }

    let mut level_ids = IdAllocator::default();
    let mut module_ids = IdAllocator::default();
    let mut missing = Vec::new();
    let mut included = 0usize;
    let mut module_index = 0usize;
    let mut levels = Vec::with_capacity(skeleton.levels.len());

    for (level_index, level) in skeleton.levels.iter().enumerate() {
        let level_id = level_ids.claim(level_base_id(level.id.as_deref(), &level.title, level_index));
        let mut modules = Vec::with_capacity(level.modules.len());

        for module in &level.modules {
            let module_id = module_ids.claim(module_base_id(
                module.id.as_deref(),
                module.slug.as_deref(),
                &module.title,
                module_index,
            ));
            module_index += 1;

            let module_slug = module.resolved_slug();
            let mut lessons = Vec::with_capacity(module.lessons.len());
            for node in &module.lessons {
                let key = LessonKey::new(curriculum_id, &module_slug, &node.resolved_slug());
                match repo.load(&key).await {
                    Ok(lesson) => {
                        lessons.push(lesson);
                        included += 1;
                    }
                    Err(err) => {
                        let path = repo.lesson_path(&key);
                        warn!(path = %path.display(), error = %err, "lesson omitted from bundle");
                        missing.push(MissingLesson {
                            key,
                            path,
                            reason: format!("{err:#}"),
                        });
                    }
                }
            }

            modules.push(BundledModule {
                id: module_id,
                title: module.title.clone(),
                slug: module.slug.clone(),
                lessons,
                extra: module.extra.clone(),
            });
        }

        levels.push(BundledLevel {
            id: level_id,
            title: level.title.clone(),
            modules,
            extra: level.extra.clone(),
        });
    }

    info!(
        curriculum = curriculum_id,
        included,
        missing = missing.len(),
        "curriculum bundled"
    );

    Ok(BundleReport {
        document: BundledCurriculum {
            slug: skeleton.slug.clone(),
            title: skeleton.title.clone(),
            language_of_instruction: skeleton.language_of_instruction.clone(),
            target_language: skeleton.target_language.clone(),
            levels,
            extra: skeleton.extra.clone(),
        },
        included,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson::{Block, TextBlock};
    use serde_json::json;
    use tempfile::TempDir;

    fn skeleton() -> CurriculumSkeleton {
        serde_json::from_value(json!({
            "slug": "english-to-arabic",
            "title": "Arabic",
            "levels": [
                {"title": "Basics", "modules": [
                    {"title": "Nouns", "lessons": [
                        {"title": "Lesson A", "slug": "lesson-a"},
                        {"title": "Lesson B", "slug": "lesson-b", "brief": "placeholder"}
                    ]},
                    {"title": "Nouns", "slug": "nouns-two", "lessons": []}
                ]},
                {"id": "lvl-x", "title": "Basics", "modules": []},
                {"title": "Basics", "modules": []}
            ]
        }))
        .unwrap()
    }

    fn lesson(slug: &str) -> Lesson {
        Lesson {
            id: slug.to_string(),
            slug: slug.to_string(),
            title: slug.to_uppercase(),
            blocks: vec![Block::Text(TextBlock {
                id: None,
                data: "body".to_string(),
            })],
            quiz: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn missing_lesson_is_reported_and_omitted() {
        let dir = TempDir::new().unwrap();
        let repo = LessonRepository::new(dir.path());
        repo.save(&LessonKey::new("english-to-arabic", "nouns", "lesson-a"), &lesson("lesson-a"))
            .await
            .unwrap();

        let report = bundle(&skeleton(), &repo, "english-to-arabic").await.unwrap();
        assert_eq!(report.included, 1);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].key.lesson_slug, "lesson-b");
        assert!(!report.is_complete());

        let nouns = &report.document.levels[0].modules[0];
        assert_eq!(nouns.lessons.len(), 1);
        assert_eq!(nouns.lessons[0].slug, "lesson-a");
    }

    #[tokio::test]
    async fn synthesised_ids_are_unique_and_reproducible() {
        let dir = TempDir::new().unwrap();
        let repo = LessonRepository::new(dir.path());
        repo.save(&LessonKey::new("english-to-arabic", "nouns", "lesson-a"), &lesson("lesson-a"))
            .await
            .unwrap();

        let first = bundle(&skeleton(), &repo, "english-to-arabic").await.unwrap();
        let second = bundle(&skeleton(), &repo, "english-to-arabic").await.unwrap();
        assert_eq!(first.document, second.document);

        let level_ids: Vec<_> = first.document.levels.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(level_ids, vec!["basics", "lvl-x", "basics-3"]);
        let module_ids: Vec<_> = first.document.levels[0]
            .modules
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(module_ids, vec!["nouns", "nouns-two"]);
    }

    #[tokio::test]
    async fn bundled_document_keeps_skeleton_header() {
        let dir = TempDir::new().unwrap();
        let repo = LessonRepository::new(dir.path());
        repo.save(&LessonKey::new("english-to-arabic", "nouns", "lesson-b"), &lesson("lesson-b"))
            .await
            .unwrap();

        let report = bundle(&skeleton(), &repo, "english-to-arabic").await.unwrap();
        let value = serde_json::to_value(&report.document).unwrap();
        assert_eq!(value["slug"], "english-to-arabic");
        assert_eq!(value["levels"][0]["modules"][0]["lessons"][0]["id"], "lesson-b");
        assert!(value["levels"][0]["modules"][0]["lessons"][0].get("brief").is_none());
    }

    #[tokio::test]
    async fn unknown_curriculum_is_an_error() {
        let dir = TempDir::new().unwrap();
        let repo = LessonRepository::new(dir.path());
        assert!(bundle(&skeleton(), &repo, "nope").await.is_err());
    }
}
