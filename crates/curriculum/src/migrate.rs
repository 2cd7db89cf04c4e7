//! In-place schema migration for persisted lessons.
//!
//! Earlier prompt versions let the model emit text blocks whose `data` was a
//! structured object (`{"title": "...", "content": "..."}`) or a list of
//! paragraphs.  The current schema requires a flat string.  The transform is
//! pure and replayable: string data is never touched, so a second run reports
//! every file as unchanged.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{info, warn};

use crate::fsutil::write_json_atomic;
use crate::repository::json_files_under;

const TEXT_HEADER_KEYS: &[&str] = &["heading", "title", "subtitle"];
const TEXT_BODY_KEYS: &[&str] = &["content", "text", "body", "value", "description"];

#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub scanned: usize,
    /// Files rewritten (or that would be rewritten under `dry_run`).
    pub changed: Vec<PathBuf>,
    pub unchanged: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Extract the intended string content of a legacy text block payload.
pub fn flatten_text_data(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(|item| flatten_text_data(item).trim().to_string())
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => {
            let mut parts = Vec::new();
            for key in TEXT_HEADER_KEYS {
                if let Some(Value::String(value)) = map.get(*key) {
                    if !value.trim().is_empty() {
                        parts.push(value.trim().to_string());
                    }
                }
            }

            let body: Vec<String> = TEXT_BODY_KEYS
                .iter()
                .filter_map(|key| match map.get(*key) {
                    Some(Value::String(value)) if !value.trim().is_empty() => {
                        Some(value.trim().to_string())
                    }
                    _ => None,
                })
                .collect();
            if !body.is_empty() {
                parts.push(body.join("\n\n"));
            }

            let extra: Vec<String> = map
                .iter()
                .filter(|(key, _)| {
                    !TEXT_HEADER_KEYS.contains(&key.as_str()) && !TEXT_BODY_KEYS.contains(&key.as_str())
                })
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| match value {
                    Value::String(s) => format!("{key}: {s}"),
                    other => format!("{key}: {other}"),
                })
                .collect();
            if !extra.is_empty() {
                parts.push(extra.join("\n"));
            }

            parts.join("\n\n").trim().to_string()
        }
        other => other.to_string(),
    }
}

fn text_blocks_mut(lesson: &mut Value) -> impl Iterator<Item = &mut Value> {
    lesson
        .get_mut("blocks")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
}

fn needs_flattening(data: &Value) -> bool {
    !data.is_string() && !flatten_text_data(data).is_empty()
}

/// Number of text blocks still carrying structured `data`.
pub fn legacy_text_block_count(lesson: &Value) -> usize {
    lesson
        .get("blocks")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter(|block| block.get("data").is_some_and(needs_flattening))
                .count()
        })
        .unwrap_or(0)
}

/// Rewrite legacy text blocks in place; returns how many blocks changed.
pub fn migrate_lesson_value(lesson: &mut Value) -> usize {
    let mut changed = 0;
    for block in text_blocks_mut(lesson) {
        let Some(data) = block.get_mut("data") else { continue };
        if needs_flattening(data) {
            *data = Value::String(flatten_text_data(data));
            changed += 1;
        }
    }
    changed
}

/// Scan every lesson JSON under `root` and flatten legacy text blocks.
///
/// With `dry_run` the same report is produced but nothing is written.
pub async fn migrate(root: &Path, dry_run: bool) -> Result<MigrationReport> {
    if !root.exists() {
        bail!("{} does not exist", root.display());
    }

    let mut report = MigrationReport {
        dry_run,
        ..Default::default()
    };

    for path in json_files_under(root) {
        report.scanned += 1;
        match migrate_file(&path, dry_run).await {
            Ok(true) => {
                info!(path = %path.display(), dry_run, "lesson migrated");
                report.changed.push(path);
            }
            Ok(false) => report.unchanged += 1,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not migrate lesson");
                report.failures.push((path, format!("{err:#}")));
            }
        }
    }

    Ok(report)
}

async fn migrate_file(path: &Path, dry_run: bool) -> Result<bool> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    if migrate_lesson_value(&mut value) == 0 {
        return Ok(false);
    }
    if !dry_run {
        write_json_atomic(path, &value).await?;
    }
    Ok(true)
}
