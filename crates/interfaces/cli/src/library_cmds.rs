//! Commands that work on lessons already on disk: bundling, migration,
//! reindexing and text cleanup.

use std::path::Path;

use anyhow::{Result, bail};
use tracing::warn;

use kitabite_config::AppConfig;
use kitabite_curriculum::cleanup::{clean_target, load_rules};
use kitabite_curriculum::fsutil::write_json_atomic;
use kitabite_curriculum::{BundleReport, CurriculumSkeleton, LessonRepository, bundle, migrate};
use kitabite_runtime::{Embedder, NoEmbeddings, reindex, router_from_config};

pub(crate) async fn run_bundle(
    config: &AppConfig,
    curriculum_id: &str,
    skeleton_path: &Path,
    output: &Path,
    strict: bool,
) -> Result<()> {
    let skeleton = CurriculumSkeleton::load(skeleton_path).await?;
    let repo = LessonRepository::new(config.paths.generated_path());
    let report = bundle(&skeleton, &repo, curriculum_id).await?;

    if strict && !report.is_complete() {
        print_missing(&report);
        bail!(
            "{} lesson(s) missing; nothing written (drop --strict to write a partial bundle)",
            report.missing.len()
        );
    }

    write_json_atomic(output, &report.document).await?;
    print_bundle_report(&report, output);
    Ok(())
}

pub(crate) fn print_bundle_report(report: &BundleReport, output: &Path) {
    println!("── bundle ───────────────────────────────────────────");
    println!("  output   : {}", output.display());
    println!("  included : {}", report.included);
    println!("  missing  : {}", report.missing.len());
    print_missing(report);
}

fn print_missing(report: &BundleReport) {
    for missing in &report.missing {
        println!("  - {} ({}): {}", missing.key, missing.path.display(), missing.reason);
    }
}

pub(crate) async fn run_migrate(root: &Path, dry_run: bool) -> Result<()> {
    let report = migrate(root, dry_run).await?;

    let verb = if report.dry_run { "would change" } else { "changed" };
    println!("── lesson migration ─────────────────────────────────");
    println!("  scanned   : {}", report.scanned);
    println!("  {verb:<10}: {}", report.changed.len());
    println!("  unchanged : {}", report.unchanged);
    println!("  failed    : {}", report.failures.len());
    for path in &report.changed {
        println!("  ~ {}", path.display());
    }
    for (path, reason) in &report.failures {
        println!("  ! {}: {reason}", path.display());
    }
    Ok(())
}

pub(crate) async fn run_reindex(config: &AppConfig, source: &Path, output: &Path, clear: bool) -> Result<()> {
    let router = router_from_config(config);
    let embedder: &dyn Embedder = match &router {
        Ok(router) => router,
        Err(err) => {
            warn!(error = %err, "embeddings unavailable; indexing without vectors");
            &NoEmbeddings
        }
    };

    let report = reindex(source, output, clear, embedder).await?;

    println!("── memory reindex ───────────────────────────────────");
    println!("  source         : {}", source.display());
    println!("  output         : {}", output.display());
    println!("  mode           : {}", if clear { "rebuild" } else { "upsert" });
    println!("  scanned        : {}", report.scanned);
    println!("  indexed        : {}", report.indexed);
    println!("  without vector : {}", report.without_vector);
    println!("  vectors reused : {}", report.reused);
    println!("  skipped        : {}", report.skipped.len());
    println!("  total entries  : {}", report.total_entries);
    for (path, reason) in &report.skipped {
        println!("  ! {}: {reason}", path.display());
    }
    Ok(())
}

pub(crate) async fn run_cleanup(
    instructions: &Path,
    target: &Path,
    dry_run: bool,
    output_dir: Option<&Path>,
) -> Result<()> {
    let mut rules = load_rules(instructions).await?;
    let report = clean_target(target, &mut rules, dry_run, output_dir).await?;

    println!("── text cleanup{} ──────────────────────────────────", if dry_run { " (dry run)" } else { "" });
    println!("  scanned : {}", report.scanned);
    println!("  changed : {}", report.changed.len());
    println!("  failed  : {}", report.failures.len());
    for path in &report.changed {
        println!("  ~ {}", path.display());
    }
    for (path, reason) in &report.failures {
        println!("  ! {}: {reason}", path.display());
    }

    println!();
    println!("── rule hits ────────────────────────────────────────");
    for rule in &rules {
        println!("  {:>5}  {}", rule.hits, rule.description);
    }
    Ok(())
}
