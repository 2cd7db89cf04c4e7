//! Memory indexing of saved lessons, and full rebuilds from the repository.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{debug, info, warn};

use kitabite_curriculum::repository::{json_files_under, load_lesson_file};
use kitabite_curriculum::{Lesson, LessonKey, LessonRepository, normalize};
use kitabite_memory::{EntryKey, MemoryEntry, MemoryStore};

use crate::collaborators::Embedder;

/// Build the index entry for a saved lesson.  `module` is the module slug the
/// file lives under, so entries built here and by [`reindex`] share a key.
///
/// When `previous` was embedded from the same content its vector is reused
/// instead of calling the embedder again.  The stored path is absolute.
pub async fn build_entry(
    embedder: &dyn Embedder,
    key: &LessonKey,
    module_title: &str,
    lesson: &Lesson,
    path: &Path,
    previous: Option<&MemoryEntry>,
) -> MemoryEntry {
    let text = lesson.embedding_text();
    let vector = match previous.and_then(|p| p.vector_for(&text)) {
        Some(vector) => {
            debug!(slug = %key.lesson_slug, "content unchanged; reusing vector");
            Some(vector.to_vec())
        }
        None => embedder.embed(&text).await,
    };
    if vector.is_none() {
        warn!(slug = %key.lesson_slug, "indexing without a vector");
    }
    let title = if lesson.title.trim().is_empty() {
        key.lesson_slug.clone()
    } else {
        lesson.title.clone()
    };
    let mut entry = MemoryEntry::new(
        &key.curriculum_id,
        title,
        key.lesson_slug.clone(),
        key.module_slug.clone(),
        absolute_display(path),
        vector,
    )
    .with_content_hash(&text);
    if !module_title.is_empty() {
        entry
            .meta
            .insert("module_title".to_string(), Value::from(module_title));
    }
    entry
}

fn entry_key(key: &LessonKey) -> EntryKey {
    EntryKey::new(&key.curriculum_id, &key.module_slug, &key.lesson_slug)
}

/// Entries are read back from other working directories, so relative lesson
/// paths are anchored to the current one.
fn absolute_display(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Upsert the entry for `lesson` and persist the whole store to `index_path`.
pub async fn index_lesson(
    store: &mut MemoryStore,
    index_path: &Path,
    embedder: &dyn Embedder,
    key: &LessonKey,
    module_title: &str,
    lesson: &Lesson,
    lesson_path: &Path,
) -> Result<MemoryEntry> {
    let previous = store.get(&entry_key(key));
    let entry = build_entry(embedder, key, module_title, lesson, lesson_path, previous).await;
    let replaced = store.upsert(entry.clone());
    store.save(index_path).await?;
    info!(key = %key, replaced, has_vector = entry.has_vector(), "lesson indexed");
    Ok(entry)
}

#[derive(Debug, Clone, Default)]
pub struct ReindexReport {
    pub scanned: usize,
    pub indexed: usize,
    pub without_vector: usize,
    /// Unchanged lessons whose existing vector was kept.
    pub reused: usize,
    pub skipped: Vec<(PathBuf, String)>,
    pub total_entries: usize,
}

/// Rebuild the index at `output` from every lesson under `source`.
///
/// With `clear` the store starts empty; otherwise existing entries are kept
/// and re-indexed lessons replace theirs, keeping their vector when the
/// lesson content is unchanged.  Unreadable lessons are reported and skipped.
pub async fn reindex(
    source: &Path,
    output: &Path,
    clear: bool,
    embedder: &dyn Embedder,
) -> Result<ReindexReport> {
    if !source.exists() {
        bail!("{} does not exist", source.display());
    }

    let mut store = if clear {
        MemoryStore::new()
    } else {
        MemoryStore::load(output).await?
    };
    let repo = LessonRepository::new(source);
    let mut report = ReindexReport::default();

    for path in json_files_under(source) {
        report.scanned += 1;
        let lesson = match load_lesson_file(&path).await {
            Ok(lesson) => lesson,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not read lesson");
                report.skipped.push((path, format!("{err:#}")));
                continue;
            }
        };

        let key = key_for(&repo, &path, &lesson);
        let module_title = lesson
            .extra
            .get("module")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let previous = store.get(&entry_key(&key));
        if previous.is_some_and(|p| p.vector_for(&lesson.embedding_text()).is_some()) {
            report.reused += 1;
        }
        let entry = build_entry(embedder, &key, &module_title, &lesson, &path, previous).await;
        if !entry.has_vector() {
            report.without_vector += 1;
        }
        store.upsert(entry);
        report.indexed += 1;
    }

    store.save(output).await?;
    report.total_entries = store.len();
    info!(
        source = %source.display(),
        output = %output.display(),
        clear,
        indexed = report.indexed,
        reused = report.reused,
        skipped = report.skipped.len(),
        "memory index rebuilt"
    );
    Ok(report)
}

/// Key from the repository layout, or from the lesson itself when the file
/// sits outside `<curriculum>/<module>/<slug>.json`.
fn key_for(repo: &LessonRepository, path: &Path, lesson: &Lesson) -> LessonKey {
    if let Some(key) = repo.key_for_path(path) {
        return key;
    }
    let module = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let slug = [lesson.slug.as_str(), lesson.id.as_str(), stem]
        .into_iter()
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default();
    LessonKey {
        curriculum_id: String::new(),
        module_slug: normalize(module),
        lesson_slug: normalize(slug),
    }
}
