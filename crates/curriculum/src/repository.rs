//! File-backed store of finalised lessons at
//! `<root>/<curriculum_id>/<module_slug>/<lesson_slug>.json`.
//!
//! The repository is the source of truth for lesson content.  Every write is a
//! whole-file atomic replace, so saving the same key twice overwrites in place
//! and concurrent readers never see a partial document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::CurriculumError;
use crate::fsutil::write_json_atomic;
use crate::lesson::Lesson;
use crate::migrate::legacy_text_block_count;
use crate::slug::normalize;

/// Storage coordinates of one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LessonKey {
    pub curriculum_id: String,
    pub module_slug: String,
    pub lesson_slug: String,
}

impl LessonKey {
    /// Every segment is normalised so keys built from raw titles and keys
    /// recovered from paths agree.
    pub fn new(curriculum_id: &str, module_slug: &str, lesson_slug: &str) -> Self {
        Self {
            curriculum_id: normalize(curriculum_id),
            module_slug: normalize(module_slug),
            lesson_slug: normalize(lesson_slug),
        }
    }
}

impl std::fmt::Display for LessonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.curriculum_id, self.module_slug, self.lesson_slug)
    }
}

#[derive(Debug, Clone)]
pub struct LessonRepository {
    root: PathBuf,
}

impl LessonRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn curriculum_dir(&self, curriculum_id: &str) -> PathBuf {
        self.root.join(normalize(curriculum_id))
    }

    pub fn lesson_path(&self, key: &LessonKey) -> PathBuf {
        self.root
            .join(&key.curriculum_id)
            .join(&key.module_slug)
            .join(format!("{}.json", key.lesson_slug))
    }

    pub fn exists(&self, key: &LessonKey) -> bool {
        self.lesson_path(key).is_file()
    }

    /// Persist `lesson` under `key`, replacing any previous version.
    pub async fn save(&self, key: &LessonKey, lesson: &Lesson) -> Result<PathBuf> {
        let path = self.lesson_path(key);
        write_json_atomic(&path, lesson)
            .await
            .with_context(|| format!("saving lesson {key}"))?;
        debug!(path = %path.display(), "lesson saved");
        Ok(path)
    }

    pub async fn load(&self, key: &LessonKey) -> Result<Lesson> {
        load_lesson_file(&self.lesson_path(key)).await
    }

    /// Every `*.json` file under `root`, sorted for deterministic traversal.
    pub fn lesson_files(&self) -> Vec<PathBuf> {
        json_files_under(&self.root)
    }

    /// Recover the key of a lesson file laid out under this repository.
    pub fn key_for_path(&self, path: &Path) -> Option<LessonKey> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut parts = relative.iter();
        let curriculum = parts.next()?.to_str()?;
        let module = parts.next()?.to_str()?;
        let file = Path::new(parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let stem = file.file_stem()?.to_str()?;
        Some(LessonKey::new(curriculum, module, stem))
    }
}

/// Read a lesson file, distinguishing a missing file, a legacy (unmigrated)
/// shape and an otherwise malformed document.
pub async fn load_lesson_file(path: &Path) -> Result<Lesson> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(CurriculumError::LessonMissing(path.to_path_buf()).into());
        }
        Err(err) => {
            return Err(anyhow::Error::from(err).context(format!("reading {}", path.display())));
        }
    };
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing lesson JSON {}", path.display()))?;

    let legacy = legacy_text_block_count(&value);
    if legacy > 0 {
        return Err(CurriculumError::SchemaMismatch {
            path: path.to_path_buf(),
            reason: format!("{legacy} text block(s) carry structured data"),
        }
        .into());
    }

    Lesson::from_value(value).with_context(|| format!("invalid lesson {}", path.display()))
}

pub fn json_files_under(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    files.sort();
    files
}
