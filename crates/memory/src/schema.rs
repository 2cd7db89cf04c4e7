use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use kitabite_curriculum::normalize;

/// Index record for one authored lesson.
///
/// `path` points at the lesson file in the repository; the entry itself is a
/// derived cache and can always be rebuilt from that file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    #[serde(alias = "id")]
    pub item_id: String,
    pub title: String,
    pub slug: String,
    pub module: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Uniqueness key: one live entry per `(curriculum, module, slug)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub curriculum: String,
    pub module: String,
    pub slug: String,
}

impl EntryKey {
    pub fn new(curriculum: &str, module: &str, slug: &str) -> Self {
        Self {
            curriculum: curriculum.to_string(),
            module: normalize(module),
            slug: normalize(slug),
        }
    }
}

/// Hex sha256 of `content`.
pub fn content_hash_of(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    format!("{:x}", h.finalize())
}

impl MemoryEntry {
    /// Fresh entry with a random id and `meta.created_at` / `meta.curriculum`
    /// filled in.
    pub fn new(
        curriculum_id: &str,
        title: impl Into<String>,
        slug: impl Into<String>,
        module: impl Into<String>,
        path: impl Into<String>,
        vector: Option<Vec<f32>>,
    ) -> Self {
        let mut meta = Map::new();
        meta.insert("created_at".to_string(), Value::from(Utc::now().timestamp()));
        meta.insert("curriculum".to_string(), Value::from(curriculum_id));
        Self {
            item_id: Uuid::new_v4().to_string(),
            title: title.into(),
            slug: slug.into(),
            module: module.into(),
            path: path.into(),
            vector: vector.filter(|v| !v.is_empty()),
            meta,
        }
    }

    /// Record a content fingerprint so reindexing can tell whether the file
    /// changed since it was embedded.
    pub fn with_content_hash(mut self, content: &str) -> Self {
        self.meta
            .insert("content_hash".to_string(), Value::from(content_hash_of(content)));
        self
    }

    /// The stored vector, if this entry was embedded from exactly `content`.
    pub fn vector_for(&self, content: &str) -> Option<&[f32]> {
        let vector = self.vector.as_deref().filter(|v| !v.is_empty())?;
        (self.content_hash() == Some(content_hash_of(content).as_str())).then_some(vector)
    }

    /// Unix seconds from `meta.created_at`; `0` when absent.
    pub fn created_at(&self) -> i64 {
        match self.meta.get("created_at") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    pub fn curriculum(&self) -> &str {
        self.meta
            .get("curriculum")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.meta.get("content_hash").and_then(Value::as_str)
    }

    pub fn has_vector(&self) -> bool {
        self.vector.as_ref().is_some_and(|v| !v.is_empty())
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.curriculum(), &self.module, &self.slug)
    }
}
