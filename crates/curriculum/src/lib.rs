pub mod bundle;
pub mod cleanup;
pub mod error;
pub mod fsutil;
pub mod lesson;
pub mod migrate;
pub mod repository;
pub mod skeleton;
pub mod slug;

pub use bundle::{BundleReport, BundledCurriculum, MissingLesson, bundle};
pub use error::CurriculumError;
pub use lesson::{Block, BlockKind, Lesson, Question, QuestionBlock, Quiz, ShapeError};
pub use migrate::{MigrationReport, migrate};
pub use repository::{LessonKey, LessonRepository};
pub use skeleton::{CurriculumSkeleton, LessonLeaf, LessonNode, LevelNode, ModuleNode};
pub use slug::normalize;
