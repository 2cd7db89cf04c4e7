use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use kitabite_curriculum::{CurriculumSkeleton, LessonRepository};
use kitabite_llm::LlmError;
use kitabite_memory::MemoryStore;
use kitabite_runtime::{
    AuthoringContext, AuthoringError, BatchOptions, BatchPipeline, BatchSummary, ChatModel, LeafState, LessonTarget,
    NoEmbeddings, ReplyFormat, SkipReason, author_one,
};

/// Scripted model: answers with a valid lesson for the slug named in the
/// prompt unless told otherwise.
#[derive(Default)]
struct FakeModel {
    calls: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    malformed: HashSet<String>,
    fatal: bool,
    fatal_on: Option<&'static str>,
}

impl FakeModel {
    fn malformed(slugs: &[&str]) -> Self {
        Self {
            malformed: slugs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn prompt_field<'a>(prompt: &'a str, label: &str) -> &'a str {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .unwrap_or_default()
        .trim()
}

#[async_trait]
impl ChatModel for FakeModel {
    async fn chat(&self, _system: &str, user: &str, format: ReplyFormat) -> Result<String, LlmError> {
        assert_eq!(format, ReplyFormat::Json);
        let slug = prompt_field(user, "Slug:").to_string();
        let title = prompt_field(user, "Lesson:").to_string();
        self.calls.lock().unwrap().push(slug.clone());
        self.prompts.lock().unwrap().push(user.to_string());

        if self.fatal || self.fatal_on == Some(slug.as_str()) {
            return Err(LlmError::MissingCredentials { provider: "openrouter" });
        }
        if self.malformed.contains(&slug) {
            return Ok("not json at all".to_string());
        }
        Ok(json!({
            "id": slug,
            "title": title,
            "blocks": [
                {"id": "b1", "type": "text", "data": "### Lesson Objectives"},
                {"id": "b2", "type": "mc", "data": {"question": "?", "options": ["x", "y"], "answer": 0}}
            ],
            "quiz": {"questions": [
                {"id": "ft-1", "type": "free-text", "data": {"question": "Say it", "answer": ["it"]}}
            ]}
        })
        .to_string())
    }
}

fn skeleton() -> CurriculumSkeleton {
    serde_json::from_value(json!({
        "slug": "english-to-arabic",
        "levels": [{
            "title": "Basics",
            "modules": [
                {"title": "Nouns", "lessons": [
                    {"title": "Lesson A", "slug": "lesson-a"},
                    {"title": "Lesson B", "slug": "lesson-b", "brief": "Focus on plurals."},
                    {"title": "Lesson C", "slug": "lesson-c"}
                ]},
                {"title": "Verbs", "slug": "verbs", "lessons": [
                    {"title": "Lesson D"}
                ]}
            ]
        }]
    }))
    .unwrap()
}

fn context(dir: &Path) -> AuthoringContext {
    AuthoringContext {
        curriculum_id: "english-to-arabic".to_string(),
        source_language: "English".to_string(),
        target_language: "Arabic".to_string(),
        style_guide: "Bold headings.".to_string(),
        repo: LessonRepository::new(dir.join("generated")),
        index_path: dir.join("memory/index.json"),
        neighbor_count: 5,
    }
}

fn options() -> BatchOptions {
    BatchOptions {
        pacing: Duration::ZERO,
        ..Default::default()
    }
}

fn lesson_file(dir: &Path, module: &str, slug: &str) -> std::path::PathBuf {
    dir.join("generated/english-to-arabic").join(module).join(format!("{slug}.json"))
}

#[tokio::test]
async fn start_at_generates_exactly_the_remaining_lessons() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();

    let opts = BatchOptions {
        start_at: Some("lesson-b".into()),
        filter_module: Some("Nouns".into()),
        ..options()
    };
    let summary = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton(), &mut store, &opts)
        .await
        .unwrap();

    assert_eq!(model.calls(), vec!["lesson-b", "lesson-c"]);
    assert!(!lesson_file(dir.path(), "nouns", "lesson-a").exists());
    assert!(lesson_file(dir.path(), "nouns", "lesson-b").exists());
    assert!(lesson_file(dir.path(), "nouns", "lesson-c").exists());
    assert_eq!(summary.authored(), 2);
    assert_eq!(summary.outcomes[0].state, LeafState::Skipped(SkipReason::BeforeStartAt));
    assert_eq!(summary.outcomes[3].state, LeafState::Skipped(SkipReason::ModuleFiltered));

    let index = MemoryStore::load(&ctx.index_path).await.unwrap();
    let slugs: Vec<_> = index.all().iter().map(|e| e.slug.as_str()).collect();
    assert_eq!(slugs, vec!["lesson-b", "lesson-c"]);
}

#[tokio::test]
async fn start_at_is_normalised() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();

    let opts = BatchOptions {
        start_at: Some("Lesson C".into()),
        ..options()
    };
    BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton(), &mut store, &opts)
        .await
        .unwrap();
    assert_eq!(model.calls(), vec!["lesson-c", "lesson-d"]);
}

#[tokio::test]
async fn unknown_start_at_authors_nothing() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();

    let opts = BatchOptions {
        start_at: Some("lesson-z".into()),
        ..options()
    };
    let summary = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton(), &mut store, &opts)
        .await
        .unwrap();
    assert!(model.calls().is_empty());
    assert!(summary.start_at_missing);
    assert_eq!(summary.skipped(), 4);
}

#[tokio::test]
async fn malformed_reply_fails_leaf_and_batch_continues() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::malformed(&["lesson-b"]);
    let mut store = MemoryStore::new();

    let summary = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton(), &mut store, &options())
        .await
        .unwrap();

    assert_eq!(model.calls(), vec!["lesson-a", "lesson-b", "lesson-c", "lesson-d"]);
    assert_eq!(summary.authored(), 3);
    assert_eq!(summary.failed(), 1);
    let failure = summary.failures().next().unwrap();
    assert_eq!(failure.key.lesson_slug, "lesson-b");
    assert_eq!(failure.raw.as_deref(), Some("not json at all"));
    assert!(!lesson_file(dir.path(), "nouns", "lesson-b").exists());
    assert!(lesson_file(dir.path(), "verbs", "lesson-d").exists());
    assert_eq!(MemoryStore::load(&ctx.index_path).await.unwrap().len(), 3);
}

#[tokio::test]
async fn rerun_overwrites_instead_of_duplicating() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();
    let pipeline = BatchPipeline::new(&ctx, &model, &NoEmbeddings);

    pipeline.run(&skeleton(), &mut store, &options()).await.unwrap();
    pipeline.run(&skeleton(), &mut store, &options()).await.unwrap();

    assert_eq!(model.calls().len(), 8);
    let nouns_dir = dir.path().join("generated/english-to-arabic/nouns");
    assert_eq!(std::fs::read_dir(nouns_dir).unwrap().count(), 3);
    assert_eq!(MemoryStore::load(&ctx.index_path).await.unwrap().len(), 4);
}

#[tokio::test]
async fn skip_existing_leaves_saved_lessons_alone() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let first = FakeModel::default();
    let mut store = MemoryStore::new();
    BatchPipeline::new(&ctx, &first, &NoEmbeddings)
        .run(&skeleton(), &mut store, &options())
        .await
        .unwrap();

    let second = FakeModel::default();
    let opts = BatchOptions {
        skip_existing: true,
        ..options()
    };
    let summary = BatchPipeline::new(&ctx, &second, &NoEmbeddings)
        .run(&skeleton(), &mut store, &opts)
        .await
        .unwrap();
    assert!(second.calls().is_empty());
    assert!(summary
        .outcomes
        .iter()
        .all(|o| o.state == LeafState::Skipped(SkipReason::AlreadyExists)));
}

#[tokio::test]
async fn fatal_errors_abort_the_run() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel {
        fatal: true,
        ..Default::default()
    };
    let mut store = MemoryStore::new();

    let err = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton(), &mut store, &options())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthoringError::FatalConfig { .. }));
    assert_eq!(model.calls().len(), 1);
}

#[tokio::test]
async fn fatal_error_keeps_the_outcomes_recorded_so_far() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel {
        fatal_on: Some("lesson-b"),
        ..Default::default()
    };
    let mut store = MemoryStore::new();
    let mut summary = BatchSummary::default();

    let err = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run_into(&skeleton(), &mut store, &options(), &mut summary)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(model.calls(), vec!["lesson-a", "lesson-b"]);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].key.lesson_slug, "lesson-a");
    assert_eq!(summary.outcomes[0].state, LeafState::Indexed);
    assert!(lesson_file(dir.path(), "nouns", "lesson-a").exists());
}

#[tokio::test]
async fn index_write_failure_keeps_the_saved_lesson_and_reports_it() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let ctx = AuthoringContext {
        index_path: blocker.join("index.json"),
        ..context(dir.path())
    };
    let model = FakeModel::default();
    let mut store = MemoryStore::new();
    let opts = BatchOptions {
        filter_module: Some("nouns".into()),
        ..options()
    };

    let summary = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton(), &mut store, &opts)
        .await
        .unwrap();

    assert_eq!(model.calls(), vec!["lesson-a", "lesson-b", "lesson-c"]);
    assert_eq!(summary.failed(), 3);
    for failure in summary.failures() {
        let error = failure.error.as_deref().unwrap();
        assert!(error.contains("index inconsistency"), "{error}");
        assert!(error.contains("reindex-memory"), "{error}");
        assert!(failure.raw.is_none());
        assert!(lesson_file(dir.path(), "nouns", &failure.key.lesson_slug).exists());
    }
}

#[tokio::test]
async fn interrupt_stops_before_the_next_leaf() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();

    let summary = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .with_interrupt(Arc::new(AtomicBool::new(true)))
        .run(&skeleton(), &mut store, &options())
        .await
        .unwrap();
    assert!(model.calls().is_empty());
    assert_eq!(summary.resume_from.as_deref(), Some("lesson-a"));
}

#[tokio::test]
async fn duplicate_lesson_slugs_are_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();
    let skeleton: CurriculumSkeleton = serde_json::from_value(json!({
        "levels": [{"title": "L", "modules": [
            {"title": "One", "lessons": [{"title": "Same"}]},
            {"title": "Two", "lessons": [{"title": "Same"}]}
        ]}]
    }))
    .unwrap();

    let err = BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton, &mut store, &options())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn earlier_lessons_feed_later_prompts() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();

    BatchPipeline::new(&ctx, &model, &NoEmbeddings)
        .run(&skeleton(), &mut store, &options())
        .await
        .unwrap();

    let prompts = model.prompts.lock().unwrap();
    assert!(!prompts[0].contains("\"title\":\"Lesson A\""));
    assert!(prompts[1].contains("\"title\":\"Lesson A\""));
    assert!(prompts[1].contains("Lesson brief: Focus on plurals."));
}

#[tokio::test]
async fn author_one_saves_and_indexes() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let model = FakeModel::default();
    let mut store = MemoryStore::new();

    let target = LessonTarget::new("Nouns", "Noun Cases", Some("nouns-cases-301"), None);
    let authored = author_one(&ctx, &model, &NoEmbeddings, &mut store, &target).await.unwrap();
    assert_eq!(authored.path, lesson_file(dir.path(), "nouns", "nouns-cases-301"));
    assert_eq!(authored.lesson.slug, "nouns-cases-301");
    assert_eq!(store.len(), 1);

    let failing = FakeModel::malformed(&["nouns-cases-302"]);
    let target = LessonTarget::new("Nouns", "More Cases", Some("nouns-cases-302"), None);
    let err = author_one(&ctx, &failing, &NoEmbeddings, &mut store, &target).await.unwrap_err();
    assert_eq!(err.raw_output(), Some("not json at all"));
    assert_eq!(store.len(), 1);
}
