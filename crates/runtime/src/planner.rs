//! Draft a curriculum skeleton with the model.

use serde_json::Value;
use tracing::info;

use kitabite_curriculum::{CurriculumSkeleton, normalize};
use kitabite_llm::extract_json_output;

use crate::collaborators::{ChatModel, ReplyFormat};
use crate::error::AuthoringError;
use crate::prompt_builder::{PLAN_SYSTEM_PROMPT, PlanRequest, plan_user_prompt};

/// Ask for a plan and check it parses as a skeleton with at least one
/// lesson.  Missing header fields are filled from the request.
pub async fn plan_curriculum(model: &dyn ChatModel, request: &PlanRequest) -> Result<CurriculumSkeleton, AuthoringError> {
    let raw = model
        .chat(PLAN_SYSTEM_PROMPT, &plan_user_prompt(request), ReplyFormat::Json)
        .await
        .map_err(|err| AuthoringError::from_llm("plan", err))?;
    let plan = parse_plan(request, &raw)?;
    info!(
        levels = plan.levels.len(),
        lessons = plan.lesson_count(),
        "curriculum plan drafted"
    );
    Ok(plan)
}

fn parse_plan(request: &PlanRequest, raw: &str) -> Result<CurriculumSkeleton, AuthoringError> {
    let invalid = |reason: String| AuthoringError::Generation {
        slug: "plan".to_string(),
        reason,
        raw: Some(raw.to_string()),
    };

    let value: Value = extract_json_output(raw).ok_or_else(|| invalid("model returned invalid JSON".to_string()))?;
    let mut plan: CurriculumSkeleton =
        serde_json::from_value(value).map_err(|err| invalid(format!("not a curriculum skeleton: {err}")))?;
    if plan.lesson_count() == 0 {
        return Err(invalid("plan contains no lessons".to_string()));
    }

    if plan.language_of_instruction.is_none() {
        plan.language_of_instruction = Some(request.source_language.clone());
    }
    if plan.target_language.is_none() {
        plan.target_language = Some(request.target_language.clone());
    }
    if plan.slug.is_none() {
        plan.slug = Some(normalize(&format!(
            "{}-to-{}",
            request.source_language, request.target_language
        )));
    }
    Ok(plan)
}
