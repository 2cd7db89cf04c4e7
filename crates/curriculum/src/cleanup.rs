//! Rule-driven string edits over bundled curricula and lesson files.
//!
//! A rules file is either a bare array or `{"instructions": [...]}` /
//! `{"rules": [...]}`.  Each rule targets strings whose dotted JSON path
//! (`$.levels[0].modules[1].lessons[2].blocks[0].data`) contains one of its
//! `paths` tokens and none of its `exclude_paths` tokens.
//!
//! `regex_sub` replacements use backslash group references (`\1`,
//! `\g<name>`); a literal `$` is inserted as-is.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::{NoExpand, Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::fsutil::write_json_atomic;
use crate::repository::json_files_under;

#[derive(Debug, Deserialize)]
struct RuleSpec {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    exclude_paths: Vec<String>,
    #[serde(default)]
    find: Option<String>,
    #[serde(default)]
    replacement: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default = "default_case_sensitive")]
    case_sensitive: bool,
}

fn default_case_sensitive() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RulesFile {
    Wrapped {
        #[serde(alias = "rules")]
        instructions: Vec<RuleSpec>,
    },
    Bare(Vec<RuleSpec>),
}

#[derive(Debug, Clone)]
pub enum RuleAction {
    Replace { find: String, replacement: String },
    /// Case-insensitive literal replacement or a user pattern; the
    /// replacement is inserted verbatim for literals.
    Pattern { regex: Regex, replacement: String, literal: bool },
    Append(String),
    Prepend(String),
}

#[derive(Debug, Clone)]
pub struct CleanupRule {
    pub description: String,
    pub paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub action: RuleAction,
    /// Number of edits this rule made during the last run.
    pub hits: usize,
}

impl CleanupRule {
    fn from_spec(spec: RuleSpec) -> Result<Self> {
        let action = match spec.kind.as_str() {
            "replace" => {
                let Some(find) = spec.find else {
                    bail!("replace rule requires 'find'");
                };
                let replacement = spec.replacement.unwrap_or_default();
                if spec.case_sensitive {
                    RuleAction::Replace { find, replacement }
                } else {
                    let regex = RegexBuilder::new(&regex::escape(&find))
                        .case_insensitive(true)
                        .build()?;
                    RuleAction::Pattern { regex, replacement, literal: true }
                }
            }
            "regex_sub" => {
                let Some(pattern) = spec.pattern.filter(|p| !p.is_empty()) else {
                    bail!("regex_sub rule requires 'pattern'");
                };
                let mut builder = RegexBuilder::new(&pattern);
                for flag in &spec.flags {
                    match flag.to_ascii_uppercase().as_str() {
                        "IGNORECASE" => builder.case_insensitive(true),
                        "MULTILINE" => builder.multi_line(true),
                        "DOTALL" => builder.dot_matches_new_line(true),
                        other => bail!("unsupported regex flag '{other}'"),
                    };
                }
                let regex = builder
                    .build()
                    .with_context(|| format!("invalid pattern {pattern:?}"))?;
                RuleAction::Pattern {
                    regex,
                    replacement: expand_group_refs(&spec.replacement.unwrap_or_default()),
                    literal: false,
                }
            }
            "append" => RuleAction::Append(spec.text.unwrap_or_default()),
            "prepend" => RuleAction::Prepend(spec.text.unwrap_or_default()),
            other => bail!("unsupported rule type '{other}'"),
        };

        Ok(Self {
            description: spec.description.unwrap_or_else(|| spec.kind.clone()),
            paths: spec.paths,
            exclude_paths: spec.exclude_paths,
            action,
            hits: 0,
        })
    }

    fn applies_to(&self, path: &str) -> bool {
        if !self.paths.is_empty() && !self.paths.iter().any(|token| path.contains(token.as_str())) {
            return false;
        }
        !self.exclude_paths.iter().any(|token| path.contains(token.as_str()))
    }

    /// Apply to one string; returns the edited text and the number of edits.
    pub fn apply(&self, text: &str, path: &str) -> (String, usize) {
        if !self.applies_to(path) {
            return (text.to_string(), 0);
        }
        match &self.action {
            RuleAction::Replace { find, replacement } => {
                if find.is_empty() {
                    return (text.to_string(), 0);
                }
                let count = text.matches(find.as_str()).count();
                if count == 0 {
                    return (text.to_string(), 0);
                }
                (text.replace(find.as_str(), replacement), count)
            }
            RuleAction::Pattern { regex, replacement, literal } => {
                let count = regex.find_iter(text).count();
                if count == 0 {
                    return (text.to_string(), 0);
                }
                let replaced = if *literal {
                    regex.replace_all(text, NoExpand(replacement))
                } else {
                    regex.replace_all(text, replacement.as_str())
                };
                (replaced.into_owned(), count)
            }
            RuleAction::Append(addition) => {
                if addition.is_empty() || text.ends_with(addition.as_str()) {
                    (text.to_string(), 0)
                } else {
                    (format!("{text}{addition}"), 1)
                }
            }
            RuleAction::Prepend(addition) => {
                if addition.is_empty() || text.starts_with(addition.as_str()) {
                    (text.to_string(), 0)
                } else {
                    (format!("{addition}{text}"), 1)
                }
            }
        }
    }
}

/// Rewrite a backslash-style replacement (`\1`, `\g<name>`, `\\`) into
/// `regex` syntax, escaping any literal `$`.
fn expand_group_refs(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|&n| n != '>').collect();
                        out.push_str(&format!("${{{name}}}"));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

pub fn parse_rules(raw: &str) -> Result<Vec<CleanupRule>> {
    let specs = match serde_json::from_str::<RulesFile>(raw).context("parsing cleanup rules")? {
        RulesFile::Wrapped { instructions } => instructions,
        RulesFile::Bare(specs) => specs,
    };
    if specs.is_empty() {
        bail!("no cleanup rules defined");
    }
    specs.into_iter().map(CleanupRule::from_spec).collect()
}

pub async fn load_rules(path: &Path) -> Result<Vec<CleanupRule>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_rules(&raw)
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() || parent == "." {
        key.to_string()
    } else if key.starts_with('[') {
        format!("{parent}{key}")
    } else {
        format!("{parent}.{key}")
    }
}

/// Apply every rule to every string under `value`; returns whether anything
/// changed.
pub fn apply_rules(value: &mut Value, path: &str, rules: &mut [CleanupRule]) -> bool {
    match value {
        Value::Object(map) => {
            let mut changed = false;
            for (key, child) in map.iter_mut() {
                changed |= apply_rules(child, &child_path(path, key), rules);
            }
            changed
        }
        Value::Array(items) => {
            let mut changed = false;
            for (index, child) in items.iter_mut().enumerate() {
                changed |= apply_rules(child, &child_path(path, &format!("[{index}]")), rules);
            }
            changed
        }
        Value::String(text) => {
            let mut current = std::mem::take(text);
            let mut changed = false;
            for rule in rules.iter_mut() {
                let (next, count) = rule.apply(&current, path);
                if count > 0 {
                    rule.hits += count;
                    changed = true;
                }
                current = next;
            }
            *text = current;
            changed
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub scanned: usize,
    /// Destination of each changed file (the source itself unless an output
    /// directory was given).
    pub changed: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Run `rules` over a JSON file or every JSON file below a directory.
pub async fn clean_target(
    target: &Path,
    rules: &mut [CleanupRule],
    dry_run: bool,
    output_dir: Option<&Path>,
) -> Result<CleanupReport> {
    let (files, base_dir) = if target.is_file() {
        (vec![target.to_path_buf()], target.parent().map(Path::to_path_buf).unwrap_or_default())
    } else {
        (json_files_under(target), target.to_path_buf())
    };
    if files.is_empty() {
        bail!("no JSON files found under {}", target.display());
    }

    for rule in rules.iter_mut() {
        rule.hits = 0;
    }

    let mut report = CleanupReport {
        dry_run,
        ..Default::default()
    };
    for file in files {
        report.scanned += 1;
        let destination = match output_dir {
            Some(out) => out.join(file.strip_prefix(&base_dir).unwrap_or(&file)),
            None => file.clone(),
        };
        match clean_file(&file, &destination, rules, dry_run).await {
            Ok(true) => {
                info!(path = %destination.display(), dry_run, "cleanup applied");
                report.changed.push(destination);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(path = %file.display(), error = %err, "cleanup failed");
                report.failures.push((file, format!("{err:#}")));
            }
        }
    }
    Ok(report)
}

async fn clean_file(
    source: &Path,
    destination: &Path,
    rules: &mut [CleanupRule],
    dry_run: bool,
) -> Result<bool> {
    let raw = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("reading {}", source.display()))?;
    let mut value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", source.display()))?;
    if !apply_rules(&mut value, "$", rules) {
        return Ok(false);
    }
    if !dry_run {
        write_json_atomic(destination, &value).await?;
    }
    Ok(true)
}
