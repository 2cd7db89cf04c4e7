pub mod ask;
pub mod authoring;
pub mod collaborators;
pub mod error;
pub mod indexer;
pub mod pipeline;
pub mod planner;
pub mod prompt_builder;
pub mod ranker;

pub use ask::{Answer, ask};
pub use authoring::{AuthoredLesson, AuthoringContext, LessonTarget, author_one, parse_lesson_reply};
pub use collaborators::{ChatModel, Embedder, NoEmbeddings, ReplyFormat, router_from_config};
pub use error::AuthoringError;
pub use indexer::{ReindexReport, index_lesson, reindex};
pub use pipeline::{BatchOptions, BatchPipeline, BatchSummary, LeafOutcome, LeafState, SkipReason};
pub use planner::plan_curriculum;
pub use prompt_builder::PlanRequest;
pub use ranker::{LessonSummary, Retrieved, Retriever};
