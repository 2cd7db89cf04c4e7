use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::warn;

use kitabite_config::AppConfig;
use kitabite_curriculum::fsutil::{write_atomic, write_json_atomic};
use kitabite_curriculum::{CurriculumSkeleton, bundle};
use kitabite_memory::MemoryStore;
use kitabite_runtime::{
    AuthoringContext, AuthoringError, BatchOptions, BatchPipeline, BatchSummary, LeafState, LessonTarget, PlanRequest,
    SkipReason, ask, author_one, plan_curriculum, router_from_config,
};

use crate::library_cmds::print_bundle_report;

pub(crate) struct BatchArgs {
    pub curriculum: PathBuf,
    pub filter_module: Option<String>,
    pub start_at: Option<String>,
    pub bundle_output: Option<PathBuf>,
    pub skip_existing: bool,
}

pub(crate) async fn run_init_style(config: &AppConfig, from_file: &Path) -> Result<()> {
    let style = tokio::fs::read_to_string(from_file)
        .await
        .with_context(|| format!("reading style seed {}", from_file.display()))?;
    let style_path = config.paths.style_path();
    write_atomic(&style_path, style.as_bytes()).await?;

    let index_path = config.paths.index_path();
    if !index_path.exists() {
        MemoryStore::new().save(&index_path).await?;
    }

    println!("style guide written to {}", style_path.display());
    println!("- {} characters", style.chars().count());
    println!("- memory index: {}", index_path.display());
    Ok(())
}

pub(crate) async fn run_author_one(
    config: &AppConfig,
    curriculum_flag: Option<&str>,
    module: &str,
    lesson: &str,
    slug: &str,
    brief: Option<String>,
) -> Result<()> {
    let router = router_from_config(config)?;
    let ctx = AuthoringContext::from_config(config, curriculum_flag).await?;
    let mut store = MemoryStore::load(&ctx.index_path).await?;
    let target = LessonTarget::new(module, lesson, Some(slug), brief);

    match author_one(&ctx, &router, &router, &mut store, &target).await {
        Ok(authored) => {
            println!("lesson saved: {}", authored.path.display());
            println!("- title:  {}", authored.lesson.title);
            println!("- blocks: {}", authored.lesson.blocks.len());
            println!("- index entries: {}", store.len());
            Ok(())
        }
        Err(err) => {
            print_raw_output(&err);
            Err(err.into())
        }
    }
}

pub(crate) async fn run_author_batch(config: &AppConfig, curriculum_flag: Option<&str>, args: BatchArgs) -> Result<()> {
    let router = router_from_config(config)?;
    let ctx = AuthoringContext::from_config(config, curriculum_flag).await?;
    let skeleton = CurriculumSkeleton::load(&args.curriculum).await?;
    let mut store = MemoryStore::load(&ctx.index_path).await?;

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupt);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, Ordering::SeqCst);
                eprintln!("interrupt received; stopping after the current lesson");
            }
        });
    }

    let options = BatchOptions {
        filter_module: args.filter_module,
        start_at: args.start_at,
        skip_existing: args.skip_existing,
        pacing: Duration::from_millis(config.batch.pacing_ms),
    };
    let mut summary = BatchSummary::default();
    let outcome = BatchPipeline::new(&ctx, &router, &router)
        .with_interrupt(interrupt)
        .run_into(&skeleton, &mut store, &options, &mut summary)
        .await;
    print_batch_summary(&summary, options.start_at.as_deref());
    if let Err(err) = outcome {
        print_raw_output(&err);
        return Err(err.into());
    }

    if let Some(output) = args.bundle_output {
        if summary.resume_from.is_some() {
            println!("batch interrupted; skipping bundle");
            return Ok(());
        }
        let report = bundle(&skeleton, &ctx.repo, &ctx.curriculum_id).await?;
        write_json_atomic(&output, &report.document).await?;
        print_bundle_report(&report, &output);
    }
    Ok(())
}

pub(crate) async fn run_ask(config: &AppConfig, question: &str) -> Result<()> {
    let router = router_from_config(config)?;
    let ctx = AuthoringContext::from_config(config, None).await?;
    let store = MemoryStore::load(&ctx.index_path).await?;
    if store.is_empty() {
        warn!(path = %ctx.index_path.display(), "memory index is empty; answering without lessons");
    }

    let answer = ask(
        &router,
        &router,
        &store,
        &ctx.style_guide,
        question,
        config.batch.ask_neighbor_count,
    )
    .await?;

    println!("{}", answer.text.trim());
    if !answer.sources.is_empty() {
        println!();
        println!("── sources ──────────────────────────────────────────");
        for title in &answer.sources {
            println!("  {title}");
        }
    }
    Ok(())
}

pub(crate) async fn run_plan(config: &AppConfig, request: &PlanRequest, output: &Path) -> Result<()> {
    if request.levels == 0 || request.modules_per_level == 0 || request.lessons_per_module == 0 {
        bail!("--levels, --modules-per-level and --lessons-per-module must be at least 1");
    }
    let router = router_from_config(config)?;

    let plan = match plan_curriculum(&router, request).await {
        Ok(plan) => plan,
        Err(err) => {
            print_raw_output(&err);
            return Err(err.into());
        }
    };
    write_json_atomic(output, &plan).await?;

    let modules: usize = plan.levels.iter().map(|level| level.modules.len()).sum();
    println!("curriculum plan written to {}", output.display());
    println!("- levels:  {}", plan.levels.len());
    println!("- modules: {modules}");
    println!("- lessons: {}", plan.lesson_count());
    Ok(())
}

fn print_raw_output(err: &AuthoringError) {
    if let Some(raw) = err.raw_output() {
        eprintln!("── raw model output ─────────────────────────────────");
        eprintln!("{raw}");
    }
}

fn print_batch_summary(summary: &BatchSummary, start_at: Option<&str>) {
    let reason_count =
        |reason: SkipReason| summary.outcomes.iter().filter(|o| o.state == LeafState::Skipped(reason)).count();

    println!("── batch summary ────────────────────────────────────");
    println!("  authored        : {}", summary.authored());
    println!("  skipped (exists): {}", reason_count(SkipReason::AlreadyExists));
    println!("  skipped (filter): {}", reason_count(SkipReason::ModuleFiltered));
    println!("  skipped (resume): {}", reason_count(SkipReason::BeforeStartAt));
    println!("  failed          : {}", summary.failed());

    if summary.failed() > 0 {
        println!();
        println!("── failures ─────────────────────────────────────────");
        for failure in summary.failures() {
            println!(
                "  {} ({}): {}",
                failure.key.lesson_slug,
                failure.title,
                failure.error.as_deref().unwrap_or("unknown error")
            );
            if let Some(raw) = &failure.raw {
                println!("      raw output: {raw}");
            }
        }
    }

    if summary.start_at_missing {
        println!();
        println!(
            "start-at slug '{}' was not found in the curriculum; nothing was authored",
            start_at.unwrap_or_default()
        );
    }
    if let Some(slug) = &summary.resume_from {
        println!();
        println!("interrupted; resume with `--start-at {slug}`");
    }
}
