mod authoring_cmds;
mod library_cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kitabite_config::{AppConfig, DEFAULT_CONFIG_PATH};

#[derive(Debug, Parser)]
#[command(
    name = "kitabite",
    version,
    about = "Author, index and bundle language-course lessons"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Language of instruction (overrides config and environment).
    #[arg(long, global = true)]
    source_lang: Option<String>,
    /// Language being taught (overrides config and environment).
    #[arg(long, global = true)]
    target_lang: Option<String>,
    /// Curriculum id used for the output directory and index entries.
    #[arg(long, global = true)]
    curriculum_id: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Seed the style guide that every generation prompt carries.
    InitStyle {
        #[arg(long, value_name = "PATH")]
        from_file: PathBuf,
    },
    /// Author, save and index a single lesson.
    AuthorOne {
        #[arg(long)]
        module: String,
        #[arg(long)]
        lesson: String,
        #[arg(long)]
        slug: String,
        #[arg(long)]
        brief: Option<String>,
    },
    /// Author every lesson of a curriculum skeleton, in order.
    AuthorBatch {
        /// Curriculum skeleton JSON.
        #[arg(long, value_name = "PATH")]
        curriculum: PathBuf,
        /// Only author lessons of this module (title or slug).
        #[arg(long)]
        filter_module: Option<String>,
        /// Resume from this lesson slug (inclusive).
        #[arg(long)]
        start_at: Option<String>,
        /// Bundle the curriculum to this path once the batch ends.
        #[arg(long, value_name = "PATH")]
        bundle_output: Option<PathBuf>,
        /// Regenerate lessons that already exist on disk.
        #[arg(long)]
        no_skip_existing: bool,
    },
    /// Reassemble authored lessons into one curriculum document.
    BundleCurriculum {
        #[arg(long, value_name = "PATH")]
        curriculum: PathBuf,
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
        /// Fail instead of writing a partial bundle when lessons are missing.
        #[arg(long)]
        strict: bool,
    },
    /// Ask a question answered from the authored lessons.
    Ask {
        #[arg(long)]
        q: String,
    },
    /// Flatten legacy nested text blocks in saved lessons.
    MigrateLessons {
        /// Lesson tree to migrate (defaults to the generated directory).
        #[arg(long, value_name = "PATH")]
        root: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild the memory index from the lessons on disk.
    ReindexMemory {
        #[arg(long, value_name = "PATH")]
        source: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Start from an empty index (default).
        #[arg(long, overrides_with = "no_clear")]
        clear: bool,
        /// Upsert into the existing index instead.
        #[arg(long, overrides_with = "clear")]
        no_clear: bool,
    },
    /// Draft a curriculum skeleton with the model.
    PlanCurriculum {
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
        #[arg(long, default_value_t = 3)]
        levels: usize,
        #[arg(long, default_value_t = 4)]
        modules_per_level: usize,
        #[arg(long, default_value_t = 5)]
        lessons_per_module: usize,
        /// Guidance for one level; repeat in level order.
        #[arg(long = "level-note")]
        level_notes: Vec<String>,
        #[arg(long)]
        focus: Option<String>,
    },
    /// Apply text cleanup rules to lesson or curriculum JSON.
    CleanupText {
        /// JSON list of cleanup rules.
        #[arg(long, value_name = "PATH")]
        instructions: PathBuf,
        /// JSON file or directory to clean.
        target: PathBuf,
        #[arg(long)]
        dry_run: bool,
        /// Write cleaned copies here instead of editing in place.
        #[arg(long, value_name = "PATH")]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?
        .with_languages(cli.source_lang.as_deref(), cli.target_lang.as_deref());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let curriculum_flag = cli.curriculum_id.as_deref();

    match cli.command {
        Commands::InitStyle { from_file } => {
            authoring_cmds::run_init_style(&config, &from_file).await?;
        }
        Commands::AuthorOne {
            module,
            lesson,
            slug,
            brief,
        } => {
            authoring_cmds::run_author_one(&config, curriculum_flag, &module, &lesson, &slug, brief).await?;
        }
        Commands::AuthorBatch {
            curriculum,
            filter_module,
            start_at,
            bundle_output,
            no_skip_existing,
        } => {
            let args = authoring_cmds::BatchArgs {
                curriculum,
                filter_module,
                start_at,
                bundle_output,
                skip_existing: config.batch.skip_existing && !no_skip_existing,
            };
            authoring_cmds::run_author_batch(&config, curriculum_flag, args).await?;
        }
        Commands::BundleCurriculum {
            curriculum,
            output,
            strict,
        } => {
            let curriculum_id = config.curriculum_id(curriculum_flag);
            library_cmds::run_bundle(&config, &curriculum_id, &curriculum, &output, strict).await?;
        }
        Commands::Ask { q } => {
            authoring_cmds::run_ask(&config, &q).await?;
        }
        Commands::MigrateLessons { root, dry_run } => {
            let root = root.unwrap_or_else(|| config.paths.generated_path());
            library_cmds::run_migrate(&root, dry_run).await?;
        }
        Commands::ReindexMemory {
            source,
            output,
            clear: _,
            no_clear,
        } => {
            let source = source.unwrap_or_else(|| config.paths.generated_path());
            let output = output.unwrap_or_else(|| config.paths.index_path());
            library_cmds::run_reindex(&config, &source, &output, !no_clear).await?;
        }
        Commands::PlanCurriculum {
            output,
            levels,
            modules_per_level,
            lessons_per_module,
            level_notes,
            focus,
        } => {
            let request = kitabite_runtime::PlanRequest {
                source_language: config.curriculum.source_language.clone(),
                target_language: config.curriculum.target_language.clone(),
                levels,
                modules_per_level,
                lessons_per_module,
                level_notes,
                focus,
            };
            authoring_cmds::run_plan(&config, &request, &output).await?;
        }
        Commands::CleanupText {
            instructions,
            target,
            dry_run,
            output_dir,
        } => {
            library_cmds::run_cleanup(&instructions, &target, dry_run, output_dir.as_deref()).await?;
        }
    }

    Ok(())
}
