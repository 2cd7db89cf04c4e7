//! Resumable batch authoring over a curriculum skeleton.
//!
//! Leaves are visited strictly in declared order, one at a time.  Each leaf
//! ends in exactly one terminal state; only fatal errors stop the walk.
//! Interruption is checked between leaves, never mid-generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use kitabite_curriculum::{CurriculumSkeleton, LessonKey, LessonLeaf, normalize};
use kitabite_memory::MemoryStore;

use crate::authoring::{AuthoringContext, LessonTarget, generate_lesson, persist_lesson};
use crate::collaborators::{ChatModel, Embedder};
use crate::error::AuthoringError;

const RAW_LOG_LIMIT: usize = 400;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Only leaves of the module named by title, slug or normalised slug.
    pub filter_module: Option<String>,
    /// Skip leaves until this lesson slug is reached (inclusive).
    pub start_at: Option<String>,
    /// Leave lessons already on disk untouched.
    pub skip_existing: bool,
    /// Minimum delay between two generation calls.
    pub pacing: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BeforeStartAt,
    ModuleFiltered,
    AlreadyExists,
}

/// Terminal state of one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafState {
    Skipped(SkipReason),
    Indexed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct LeafOutcome {
    pub key: LessonKey,
    pub title: String,
    pub state: LeafState,
    pub error: Option<String>,
    /// Model output behind a generation failure, kept in full.
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<LeafOutcome>,
    /// Set when the run was interrupted: the slug to pass as `--start-at`.
    pub resume_from: Option<String>,
    /// `--start-at` named a slug that never appeared.
    pub start_at_missing: bool,
}

impl BatchSummary {
    pub fn authored(&self) -> usize {
        self.count(|s| *s == LeafState::Indexed)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, LeafState::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| *s == LeafState::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &LeafOutcome> {
        self.outcomes.iter().filter(|o| o.state == LeafState::Failed)
    }

    fn count(&self, pred: impl Fn(&LeafState) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.state)).count()
    }
}

pub struct BatchPipeline<'a> {
    ctx: &'a AuthoringContext,
    model: &'a dyn ChatModel,
    embedder: &'a dyn Embedder,
    interrupt: Arc<AtomicBool>,
}

impl<'a> BatchPipeline<'a> {
    pub fn new(ctx: &'a AuthoringContext, model: &'a dyn ChatModel, embedder: &'a dyn Embedder) -> Self {
        Self {
            ctx,
            model,
            embedder,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an interrupt flag; once set, the run stops before the next leaf.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Author every eligible leaf of `skeleton`.
    ///
    /// Returns `Err` only for fatal errors (bad skeleton, configuration);
    /// per-leaf failures are recorded in the summary.
    pub async fn run(
        &self,
        skeleton: &CurriculumSkeleton,
        store: &mut MemoryStore,
        options: &BatchOptions,
    ) -> Result<BatchSummary, AuthoringError> {
        let mut summary = BatchSummary::default();
        self.run_into(skeleton, store, options, &mut summary).await?;
        Ok(summary)
    }

    /// Like [`run`](Self::run), but records outcomes into `summary` as they
    /// happen, so the leaves finished before a fatal error stay visible.
    pub async fn run_into(
        &self,
        skeleton: &CurriculumSkeleton,
        store: &mut MemoryStore,
        options: &BatchOptions,
        summary: &mut BatchSummary,
    ) -> Result<(), AuthoringError> {
        skeleton.validate().map_err(|err| AuthoringError::Skeleton {
            reason: err.to_string(),
        })?;

        let start_at = options.start_at.as_deref().map(normalize);
        let mut started = start_at.is_none();
        let mut last_call: Option<Instant> = None;

        info!(
            curriculum = %self.ctx.curriculum_id,
            lessons = skeleton.lesson_count(),
            start_at = ?start_at,
            filter_module = ?options.filter_module,
            "batch started"
        );

        for leaf in skeleton.leaves() {
            let key = LessonKey::new(&self.ctx.curriculum_id, &leaf.module_slug, &leaf.lesson_slug);

            if let Some(filter) = options.filter_module.as_deref() {
                if !leaf.module.matches_filter(filter) {
                    summary.outcomes.push(skipped(&leaf, key, SkipReason::ModuleFiltered));
                    continue;
                }
            }
            if !started {
                if start_at.as_deref() == Some(leaf.lesson_slug.as_str()) {
                    started = true;
                } else {
                    summary.outcomes.push(skipped(&leaf, key, SkipReason::BeforeStartAt));
                    continue;
                }
            }
            if self.interrupt.load(Ordering::SeqCst) {
                warn!(resume_from = %leaf.lesson_slug, "batch interrupted");
                summary.resume_from = Some(leaf.lesson_slug.clone());
                break;
            }
            if options.skip_existing && self.ctx.repo.exists(&key) {
                info!(key = %key, "lesson exists; skipping");
                summary.outcomes.push(skipped(&leaf, key, SkipReason::AlreadyExists));
                continue;
            }

            if let Some(previous) = last_call {
                let wait = options.pacing.saturating_sub(previous.elapsed());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
            last_call = Some(Instant::now());

            let outcome = match self.author_leaf(&leaf, key, store).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(
                        error = %err,
                        authored = summary.authored(),
                        failed = summary.failed(),
                        "batch aborted"
                    );
                    return Err(err);
                }
            };
            summary.outcomes.push(outcome);
        }

        if !started {
            summary.start_at_missing = true;
            warn!(start_at = ?start_at, "start-at slug never matched; nothing was authored");
        }

        info!(
            authored = summary.authored(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            interrupted = summary.resume_from.is_some(),
            "batch finished"
        );
        Ok(())
    }

    async fn author_leaf(
        &self,
        leaf: &LessonLeaf<'_>,
        key: LessonKey,
        store: &mut MemoryStore,
    ) -> Result<LeafOutcome, AuthoringError> {
        let target = LessonTarget {
            module_title: leaf.module.title.clone(),
            module_slug: leaf.module_slug.clone(),
            lesson_title: leaf.lesson.title.clone(),
            lesson_slug: leaf.lesson_slug.clone(),
            brief: leaf.lesson.brief.clone(),
        };

        let result = match generate_lesson(self.ctx, self.model, self.embedder, store, &target).await {
            Ok(lesson) => persist_lesson(self.ctx, self.embedder, store, &target, lesson).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(authored) => {
                info!(key = %authored.key, path = %authored.path.display(), "lesson authored");
                Ok(LeafOutcome {
                    key,
                    title: target.lesson_title,
                    state: LeafState::Indexed,
                    error: None,
                    raw: None,
                })
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                let raw = err.raw_output().map(ToString::to_string);
                warn!(
                    key = %key,
                    error = %err,
                    raw = %raw.as_deref().map(truncate).unwrap_or_default(),
                    "lesson failed"
                );
                Ok(LeafOutcome {
                    key,
                    title: target.lesson_title,
                    state: LeafState::Failed,
                    error: Some(err.to_string()),
                    raw,
                })
            }
        }
    }
}

fn skipped(leaf: &LessonLeaf<'_>, key: LessonKey, reason: SkipReason) -> LeafOutcome {
    LeafOutcome {
        key,
        title: leaf.lesson.title.clone(),
        state: LeafState::Skipped(reason),
        error: None,
        raw: None,
    }
}

fn truncate(raw: &str) -> String {
    match raw.char_indices().nth(RAW_LOG_LIMIT) {
        Some((idx, _)) => format!("{}…", &raw[..idx]),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let arabic = "ب".repeat(RAW_LOG_LIMIT + 10);
        let cut = truncate(&arabic);
        assert_eq!(cut.chars().count(), RAW_LOG_LIMIT + 1);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn summary_counts() {
        let key = LessonKey::new("c", "m", "l");
        let outcome = |state| LeafOutcome {
            key: key.clone(),
            title: String::new(),
            state,
            error: None,
            raw: None,
        };
        let summary = BatchSummary {
            outcomes: vec![
                outcome(LeafState::Indexed),
                outcome(LeafState::Skipped(SkipReason::AlreadyExists)),
                outcome(LeafState::Skipped(SkipReason::BeforeStartAt)),
                outcome(LeafState::Failed),
            ],
            ..Default::default()
        };
        assert_eq!(summary.authored(), 1);
        assert_eq!(summary.skipped(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures().count(), 1);
    }
}
