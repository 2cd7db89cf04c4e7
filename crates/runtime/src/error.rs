use thiserror::Error;

use kitabite_llm::LlmError;

/// Failures of the authoring path, classified by how far they reach.
#[derive(Debug, Error)]
pub enum AuthoringError {
    /// Missing credentials or unusable model configuration; aborts the run.
    #[error("configuration error: {reason}")]
    FatalConfig { reason: String },

    /// Transport failure or unusable model output for one lesson.
    #[error("generation failed for {slug}: {reason}")]
    Generation {
        slug: String,
        reason: String,
        raw: Option<String>,
    },

    /// The lesson file could not be written.
    #[error("could not save {slug}: {reason}")]
    Storage { slug: String, reason: String },

    /// Lesson saved but not indexed; fixed by `reindex-memory`.
    #[error("index inconsistency for {slug}: {reason} (run `kitabite reindex-memory`)")]
    Index { slug: String, reason: String },

    /// The curriculum skeleton cannot drive a batch.
    #[error("curriculum skeleton unusable: {reason}")]
    Skeleton { reason: String },
}

impl AuthoringError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalConfig { .. } | Self::Skeleton { .. })
    }

    /// Raw model output attached to a generation failure.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Generation { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }

    /// Classify a model-client error for the lesson `slug`.
    pub fn from_llm(slug: &str, err: LlmError) -> Self {
        if err.is_fatal() {
            Self::FatalConfig {
                reason: err.to_string(),
            }
        } else {
            Self::Generation {
                slug: slug.to_string(),
                reason: err.to_string(),
                raw: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let missing = AuthoringError::from_llm("a", LlmError::MissingCredentials { provider: "openrouter" });
        assert!(missing.is_fatal());

        let busy = AuthoringError::from_llm(
            "a",
            LlmError::Status { provider: "openrouter", status: 429, body: "slow down".into() },
        );
        assert!(!busy.is_fatal());
        assert!(busy.to_string().contains("generation failed for a"));

        let bad = AuthoringError::Generation { slug: "a".into(), reason: "x".into(), raw: Some("{".into()) };
        assert_eq!(bad.raw_output(), Some("{"));
        assert!(AuthoringError::Skeleton { reason: "dup".into() }.is_fatal());
        assert!(!AuthoringError::Index { slug: "a".into(), reason: "disk".into() }.is_fatal());
    }
}
