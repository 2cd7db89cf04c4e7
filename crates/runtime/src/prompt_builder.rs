//! Prompt assembly for lesson generation, `ask` and curriculum planning.
//!
//! Every builder here is pure; retrieval and file reads happen before.

use crate::ranker::{AskDocument, LessonSummary};

// ─── lesson generation ───────────────────────────────────────────────────────

/// Everything the model is told about one lesson.
#[derive(Debug, Clone)]
pub struct LessonRequest {
    pub module_title: String,
    pub lesson_title: String,
    pub lesson_slug: String,
    pub brief: Option<String>,
    pub source_language: String,
    pub target_language: String,
    pub style_guide: String,
    pub neighbors: Vec<LessonSummary>,
}

pub fn lesson_system_prompt(request: &LessonRequest) -> String {
    let src = &request.source_language;
    let tgt = &request.target_language;
    format!(
        "You are Kitabite's lesson composer.\n\n\
         Language of instruction (explanations): {src}\n\
         Language being taught: {tgt}\n\n\
         LANGUAGE RULES:\n\
         - Headings, explanations and quiz stems are written in {src}.\n\
         - {tgt} appears only in the terms, examples and vocabulary being taught, each followed by a short {src} gloss.\n\
         - Never switch the narrative voice away from {src}.\n\n\
         OUTPUT SHAPE (one JSON object):\n\
         - \"id\": string\n\
         - \"slug\": string\n\
         - \"title\": string\n\
         - \"blocks\": array of blocks, each {{\"id\": string, \"type\": T, \"data\": ...}} where T is one of:\n\
         \x20   \"text\": data is ONE plain string (put headings inside the string, never nested objects)\n\
         \x20   \"audio\": data is {{\"src\": string, \"caption\": string?}}\n\
         \x20   \"image\": data is {{\"src\": string, \"alt\": string?}}\n\
         \x20   \"mc\": data is {{\"question\": string, \"options\": [string, ...], \"answer\": zero-based index}}\n\
         \x20   \"free-text\": data is {{\"question\": string, \"answer\": [accepted answers]}}\n\
         - \"quiz\": {{\"questions\": [mc or free-text items]}}\n\
         - Question items carry \"tags\": [\"module:<slug>\", \"topic:<slug>\", \"skill:<name>\", \"difficulty:<easy|medium|hard>\", \"format:<mc|free-text>\"].\n\
         - No other block types exist. Do not invent new ones.\n\n\
         HOUSE STYLE:\n\
         - Student-friendly and precise; assume the learner meets the topic for the first time.\n\
         - Short sections with clear headings, several worked examples, no text walls.\n\
         - Each lesson is self-contained. No external links.\n\
         - Stay consistent with the style guide and with earlier lessons.\n\n\
         STYLE GUIDE:\n{style}",
        style = request.style_guide.trim(),
    )
}

pub fn lesson_user_prompt(request: &LessonRequest) -> String {
    let src = &request.source_language;
    let tgt = &request.target_language;
    let brief = match request.brief.as_deref().map(str::trim) {
        Some(b) if !b.is_empty() => format!("\nLesson brief: {b}\n"),
        _ => String::new(),
    };
    let neighbors = serde_json::to_string(&request.neighbors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Author one complete lesson as JSON.\n\n\
         Module: {module}\n\
         Lesson: {title}\n\
         Slug: {slug}\n\
         Language of instruction: {src}\n\
         Language being taught: {tgt}\n{brief}\n\
         Requirements:\n\
         - Start with a \"Lesson Objectives\" text block.\n\
         - For each key concept give a simple definition, contrasting examples and non-examples, and when it is used.\n\
         - Include a \"Common Mistakes\" text block and finish with \"Key Takeaways\".\n\
         - Interleave a few mc or free-text blocks that check the material just explained.\n\
         - Write 10-14 quiz questions, mostly mc with 2-4 free-text, all tagged.\n\
         - Mark {tgt} diacritics only where they disambiguate meaning.\n\n\
         Earlier lessons (match their structure, do not copy their text):\n\
         {neighbors}\n\n\
         Return ONLY the JSON object.",
        module = request.module_title,
        title = request.lesson_title,
        slug = request.lesson_slug,
    )
}

// ─── ask ─────────────────────────────────────────────────────────────────────

pub fn ask_system_prompt(style_guide: &str) -> String {
    format!(
        "You are Kitabite's curriculum librarian. Keep answers concise and accurate, \
         with the same voice and definitions as the authored lessons. Style guide:\n\n{}",
        style_guide.trim()
    )
    .trim()
    .to_string()
}

pub fn ask_user_prompt(question: &str, documents: &[AskDocument]) -> String {
    let retrieved = serde_json::to_string_pretty(documents).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Answer the question using ONLY the retrieved lessons below.\n\
         If they do not cover it, say there is not enough context in memory.\n\n\
         Question:\n{question}\n\n\
         Retrieved lessons:\n{retrieved}\n\n\
         Answer briefly. When repeating a rule that was taught, keep its wording and format."
    )
}

// ─── curriculum planning ─────────────────────────────────────────────────────

pub const PLAN_SYSTEM_PROMPT: &str = "You design structured curricula with clear sequencing.";

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub source_language: String,
    pub target_language: String,
    pub levels: usize,
    pub modules_per_level: usize,
    pub lessons_per_module: usize,
    pub level_notes: Vec<String>,
    pub focus: Option<String>,
}

pub fn plan_user_prompt(request: &PlanRequest) -> String {
    let notes = if request.level_notes.is_empty() {
        String::new()
    } else {
        let bullets = request
            .level_notes
            .iter()
            .enumerate()
            .map(|(i, note)| format!("- Level {}: {note}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Level-specific guidance:\n{bullets}\n")
    };
    let focus = request
        .focus
        .as_deref()
        .map(|f| format!("Overall emphasis: {f}\n"))
        .unwrap_or_default();

    format!(
        "Design a curriculum plan for language learners.\n\n\
         Learners speak: {src}\n\
         They are learning: {tgt}\n\n\
         Output one JSON object:\n\
         {{\"levels\": [{{\"id\": \"level-id\", \"title\": \"...\", \"description\": \"...\",\n\
         \x20 \"modules\": [{{\"id\": \"module-id\", \"title\": \"...\", \"slug\": \"module-slug\",\n\
         \x20   \"lessons\": [{{\"title\": \"...\", \"slug\": \"lesson-slug\", \"brief\": \"...\"}}]}}]}}]}}\n\n\
         Rules:\n\
         - Exactly {levels} levels.\n\
         - About {modules} modules per level and {lessons} lessons per module (one more or fewer is fine).\n\
         - Slugs are lowercase, hyphen-separated and unique across the whole file.\n\
         - Add a brief where it helps the author: pronunciation pitfalls, contrastive grammar, culture notes.\n\
         - Mix grammar, usage, mini-dialogues and culture checkpoints, from foundations to fluency.\n\
         {notes}{focus}\n\
         Return ONLY the JSON object.",
        src = request.source_language,
        tgt = request.target_language,
        levels = request.levels,
        modules = request.modules_per_level,
        lessons = request.lessons_per_module,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request() -> LessonRequest {
        LessonRequest {
            module_title: "Nouns".into(),
            lesson_title: "Noun Cases".into(),
            lesson_slug: "noun-cases".into(),
            brief: Some("Stress the genitive.".into()),
            source_language: "English".into(),
            target_language: "Arabic".into(),
            style_guide: "Use bold headings.".into(),
            neighbors: vec![LessonSummary {
                id: "gender".into(),
                title: "Gender".into(),
                block_histogram: BTreeMap::from([("text".to_string(), 3)]),
                sample_block_types: vec!["text".into()],
                sample_quiz_kinds: vec!["mc".into()],
                representative_question: Some("Which is feminine?".into()),
            }],
        }
    }

    #[test]
    fn lesson_prompts_carry_request_fields() {
        let req = request();
        let system = lesson_system_prompt(&req);
        assert!(system.contains("Language being taught: Arabic"));
        assert!(system.contains("Use bold headings."));
        assert!(system.contains("\"free-text\""));
        assert!(!system.contains("video"));

        let user = lesson_user_prompt(&req);
        assert!(user.contains("Slug: noun-cases"));
        assert!(user.contains("Lesson brief: Stress the genitive."));
        assert!(user.contains("Which is feminine?"));
    }

    #[test]
    fn blank_brief_is_omitted() {
        let mut req = request();
        req.brief = Some("   ".into());
        assert!(!lesson_user_prompt(&req).contains("Lesson brief"));
    }

    #[test]
    fn plan_prompt_lists_level_notes() {
        let prompt = plan_user_prompt(&PlanRequest {
            source_language: "English".into(),
            target_language: "Turkish".into(),
            levels: 3,
            modules_per_level: 4,
            lessons_per_module: 5,
            level_notes: vec!["Alphabet".into(), "Vowel harmony".into()],
            focus: Some("travel".into()),
        });
        assert!(prompt.contains("Exactly 3 levels"));
        assert!(prompt.contains("- Level 2: Vowel harmony"));
        assert!(prompt.contains("Overall emphasis: travel"));
    }

    #[test]
    fn ask_system_prompt_without_style_is_trimmed() {
        assert!(ask_system_prompt("").ends_with("Style guide:"));
    }
}
