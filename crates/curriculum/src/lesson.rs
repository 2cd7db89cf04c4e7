//! Persisted lesson payload: `{id, slug, title, blocks[], quiz?}`.
//!
//! A block's `data` shape is determined by its `type` tag, so blocks are a
//! closed sum type.  Unknown keys at the lesson level are carried through in
//! [`Lesson::extra`] so a load/save cycle never drops content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    #[serde(default)]
    pub slug: String,
    pub title: String,
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz: Option<Quiz>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Block {
    Text(TextBlock),
    Audio(AudioBlock),
    Image(ImageBlock),
    Mc(QuestionBlock),
    FreeText(QuestionBlock),
}

/// Quiz entries are restricted to the two question variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Question {
    Mc(QuestionBlock),
    FreeText(QuestionBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Always a flat string; nested objects are a legacy shape handled by
    /// [`crate::migrate`].
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: AudioData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioData {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: ImageData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: QuestionData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionData {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub answer: Answer,
}

/// MC answers are a zero-based option index; free-text answers are a list of
/// accepted responses (models occasionally emit a single string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Index(usize),
    Accepted(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKind {
    Text,
    Audio,
    Image,
    Mc,
    FreeText,
}

impl BlockKind {
    /// Wire tag used in the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Mc => "mc",
            Self::FreeText => "free-text",
        }
    }
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Text(_) => BlockKind::Text,
            Self::Audio(_) => BlockKind::Audio,
            Self::Image(_) => BlockKind::Image,
            Self::Mc(_) => BlockKind::Mc,
            Self::FreeText(_) => BlockKind::FreeText,
        }
    }

    pub fn question(&self) -> Option<&QuestionBlock> {
        match self {
            Self::Mc(q) | Self::FreeText(q) => Some(q),
            Self::Text(_) | Self::Audio(_) | Self::Image(_) => None,
        }
    }
}

impl Question {
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Mc(_) => BlockKind::Mc,
            Self::FreeText(_) => BlockKind::FreeText,
        }
    }

    pub fn block(&self) -> &QuestionBlock {
        match self {
            Self::Mc(q) | Self::FreeText(q) => q,
        }
    }
}

/// Reasons a model-produced document is not a usable lesson payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    NotAnObject,
    MissingKey(&'static str),
    MissingQuizQuestions,
    Invalid(String),
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "lesson JSON must be an object"),
            Self::MissingKey(key) => write!(f, "missing required key in lesson JSON: {key}"),
            Self::MissingQuizQuestions => write!(f, "missing quiz.questions array"),
            Self::Invalid(reason) => write!(f, "lesson JSON does not match the block schema: {reason}"),
        }
    }
}

impl std::error::Error for ShapeError {}

impl Lesson {
    /// Validate and convert a parsed model response into a lesson.
    ///
    /// Required keys are checked first so the operator sees which one is
    /// missing rather than a generic serde message.
    pub fn from_value(value: Value) -> Result<Self, ShapeError> {
        let object = value.as_object().ok_or(ShapeError::NotAnObject)?;
        for key in ["id", "title", "blocks"] {
            if !object.contains_key(key) {
                return Err(ShapeError::MissingKey(key));
            }
        }
        if let Some(quiz) = object.get("quiz") {
            if !quiz.is_null() && quiz.get("questions").is_none() {
                return Err(ShapeError::MissingQuizQuestions);
            }
        }
        serde_json::from_value(value).map_err(|err| ShapeError::Invalid(err.to_string()))
    }

    /// Text used for embedding: the title followed by one serialised block
    /// per line.
    pub fn embedding_text(&self) -> String {
        let mut text = self.title.clone();
        for block in &self.blocks {
            text.push('\n');
            match serde_json::to_string(block) {
                Ok(rendered) => text.push_str(&rendered),
                Err(_) => text.push_str(block.kind().as_str()),
            }
        }
        text
    }

    /// Count of each block type, keyed by wire tag.
    pub fn block_histogram(&self) -> BTreeMap<&'static str, usize> {
        let mut histogram = BTreeMap::new();
        for block in &self.blocks {
            *histogram.entry(block.kind().as_str()).or_insert(0) += 1;
        }
        histogram
    }

    pub fn quiz_questions(&self) -> &[Question] {
        self.quiz.as_ref().map(|q| q.questions.as_slice()).unwrap_or(&[])
    }

    /// First quiz question, falling back to the first inline question block.
    pub fn representative_question(&self) -> Option<&QuestionBlock> {
        self.quiz_questions()
            .first()
            .map(Question::block)
            .or_else(|| self.blocks.iter().find_map(Block::question))
    }
}
