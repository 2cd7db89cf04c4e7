//! Curriculum skeleton: the ordered Level → Module → Lesson plan that drives
//! batch authoring and bundling.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CurriculumError;
use crate::slug::normalize;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurriculumSkeleton {
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
    #[serde(default)]
    pub levels: Vec<LevelNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub modules: Vec<ModuleNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default)]
    pub lessons: Vec<LessonNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonNode {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleNode {
    /// `normalize(slug or title)`; the directory name lessons are stored under.
    pub fn resolved_slug(&self) -> String {
        normalize(self.slug.as_deref().unwrap_or(&self.title))
    }

    /// True when `filter` names this module by raw title, raw slug or
    /// normalised slug.
    pub fn matches_filter(&self, filter: &str) -> bool {
        filter == self.title
            || self.slug.as_deref() == Some(filter)
            || normalize(filter) == self.resolved_slug()
    }
}

impl LessonNode {
    pub fn resolved_slug(&self) -> String {
        normalize(self.slug.as_deref().unwrap_or(&self.title))
    }
}

/// One lesson leaf in declared tree order.
#[derive(Debug, Clone)]
pub struct LessonLeaf<'a> {
    pub level: &'a LevelNode,
    pub module: &'a ModuleNode,
    pub lesson: &'a LessonNode,
    pub module_slug: String,
    pub lesson_slug: String,
}

impl CurriculumSkeleton {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading curriculum skeleton {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing curriculum skeleton {}", path.display()))
    }

    /// Flatten the tree into lesson leaves: levels, then modules, then lessons,
    /// exactly as written.
    pub fn leaves(&self) -> Vec<LessonLeaf<'_>> {
        let mut leaves = Vec::new();
        for level in &self.levels {
            for module in &level.modules {
                let module_slug = module.resolved_slug();
                for lesson in &module.lessons {
                    leaves.push(LessonLeaf {
                        level,
                        module,
                        lesson,
                        module_slug: module_slug.clone(),
                        lesson_slug: lesson.resolved_slug(),
                    });
                }
            }
        }
        leaves
    }

    /// Enforce slug uniqueness: modules among their level siblings, lessons
    /// across the whole curriculum.
    pub fn validate(&self) -> Result<(), CurriculumError> {
        for level in &self.levels {
            let mut seen_modules = HashSet::new();
            for module in &level.modules {
                let slug = module.resolved_slug();
                if !seen_modules.insert(slug.clone()) {
                    return Err(CurriculumError::DuplicateModuleSlug {
                        slug,
                        level: level.title.clone(),
                    });
                }
            }
        }

        let mut seen_lessons: HashMap<String, String> = HashMap::new();
        for leaf in self.leaves() {
            let location = format!("{}/{}", leaf.module_slug, leaf.lesson.title);
            if let Some(first) = seen_lessons.get(&leaf.lesson_slug) {
                return Err(CurriculumError::DuplicateLessonSlug {
                    slug: leaf.lesson_slug.clone(),
                    first: first.clone(),
                    second: location,
                });
            }
            seen_lessons.insert(leaf.lesson_slug.clone(), location);
        }
        Ok(())
    }

    pub fn lesson_count(&self) -> usize {
        self.levels
            .iter()
            .flat_map(|level| &level.modules)
            .map(|module| module.lessons.len())
            .sum()
    }
}
