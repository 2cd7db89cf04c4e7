use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use kitabite_curriculum::normalize;

/// Default location of the configuration file, relative to the working
/// directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/kitabite.toml";

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurriculumConfig {
    /// Language the learner already speaks; lessons are explained in it.
    pub source_language: String,
    /// Language being taught.
    pub target_language: String,
    /// Explicit curriculum id.  Empty means derive it from the language pair.
    pub curriculum_id: String,
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        Self {
            source_language: "English".to_string(),
            target_language: "Arabic".to_string(),
            curriculum_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenRouter,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Ollama => "ollama",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub chat_model: String,
    pub embed_model: String,
    /// Base URL for the Ollama API.  Overridden by `OLLAMA_BASE_URL`.
    pub ollama_base_url: String,
    /// OpenAI-compatible endpoint used by the `openrouter` provider.
    pub openai_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenRouter,
            chat_model: "openai/gpt-4o-mini".to_string(),
            embed_model: "openai/text-embedding-3-small".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            openai_base_url: "https://openrouter.ai/api/v1".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the lesson repository.
    pub generated_dir: String,
    /// Directory holding the style guide and the memory index.
    pub memory_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            generated_dir: "generated".to_string(),
            memory_dir: "memory".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn generated_path(&self) -> PathBuf {
        PathBuf::from(&self.generated_dir)
    }

    pub fn style_path(&self) -> PathBuf {
        Path::new(&self.memory_dir).join("style.md")
    }

    pub fn index_path(&self) -> PathBuf {
        Path::new(&self.memory_dir).join("index.json")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Minimum delay between two generation calls.
    pub pacing_ms: u64,
    /// Neighbours retrieved as style context when authoring.
    pub neighbor_count: usize,
    /// Neighbours retrieved when answering a question.
    pub ask_neighbor_count: usize,
    /// Leave lessons that already exist on disk untouched.
    pub skip_existing: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 400,
            neighbor_count: 5,
            ask_neighbor_count: 6,
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// ── AppConfig ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub curriculum: CurriculumConfig,
    pub llm: LlmConfig,
    pub paths: PathsConfig,
    pub batch: BatchConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load `path`, then apply environment overrides.  A missing file yields
    /// defaults; a file that fails to parse is an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading config file {}", path.display()));
            }
        };
        config.apply_overrides(|name| env::var(name).ok());
        Ok(config)
    }

    /// Apply `CURRICULUM_*`, `KITABITE_*` and `OLLAMA_BASE_URL` overrides as
    /// reported by `lookup`.  Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CURRICULUM_SOURCE_LANG") {
            self.curriculum.source_language = v;
        }
        if let Some(v) = get("CURRICULUM_TARGET_LANG") {
            self.curriculum.target_language = v;
        }
        if let Some(v) = get("CURRICULUM_ID") {
            self.curriculum.curriculum_id = v;
        }
        if let Some(v) = get("KITABITE_MODEL") {
            self.llm.chat_model = v;
        }
        if let Some(v) = get("KITABITE_EMBED_MODEL") {
            self.llm.embed_model = v;
        }
        if let Some(v) = get("OLLAMA_BASE_URL") {
            self.llm.ollama_base_url = v;
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Curriculum id in precedence order: `flag`, then the configured value
    /// (file or `CURRICULUM_ID`), then `normalize("<source>-to-<target>")`.
    pub fn curriculum_id(&self, flag: Option<&str>) -> String {
        match flag.map(str::trim).filter(|f| !f.is_empty()) {
            Some(id) => normalize(id),
            None if !self.curriculum.curriculum_id.trim().is_empty() => {
                normalize(&self.curriculum.curriculum_id)
            }
            None => normalize(&format!(
                "{}-to-{}",
                self.curriculum.source_language, self.curriculum.target_language
            )),
        }
    }

    /// Override the language pair from command-line flags.
    pub fn with_languages(mut self, source: Option<&str>, target: Option<&str>) -> Self {
        if let Some(s) = source.filter(|s| !s.trim().is_empty()) {
            self.curriculum.source_language = s.to_string();
        }
        if let Some(t) = target.filter(|t| !t.trim().is_empty()) {
            self.curriculum.target_language = t.to_string();
        }
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
