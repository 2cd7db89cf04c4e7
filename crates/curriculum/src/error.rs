use std::path::PathBuf;

use thiserror::Error;

/// Structural problems in curriculum skeletons and persisted lesson files.
#[derive(Debug, Error)]
pub enum CurriculumError {
    #[error("lesson slug `{slug}` appears more than once in the curriculum ({first} and {second})")]
    DuplicateLessonSlug {
        slug: String,
        first: String,
        second: String,
    },

    #[error("module slug `{slug}` appears more than once in level `{level}`")]
    DuplicateModuleSlug { slug: String, level: String },

    #[error("lesson file {path} uses a legacy block shape: {reason} (run `migrate-lessons`)")]
    SchemaMismatch { path: PathBuf, reason: String },

    #[error("lesson file not found: {0}")]
    LessonMissing(PathBuf),
}
