//! Concrete implementations of the workflow phases.

mod coding;
mod executing;
mod planning;
mod reflecting;
mod searching;

pub use coding::CodingPhase;
pub use executing::ExecutingPhase;
pub use planning::PlanningPhase;
pub use reflecting::{ReflectingPhase, run_summary};
pub use searching::SearchingPhase;

use serde_json::json;

use codeforge_hooks::{HookContext, HookEvent};
use codeforge_oracle::{Message, ModelBackend};
use codeforge_utils::error::OracleError;

use crate::state::{HookPayload, WorkflowHooks};

/// Invoke the oracle with model-call hooks wrapped around it.
///
/// Triggers `BeforeModel` and `AfterModel` with a JSON description of the
/// call; the response content is returned verbatim for parsing.
pub(crate) async fn invoke_oracle(
    hooks: &WorkflowHooks,
    oracle: &dyn ModelBackend,
    phase: &str,
    messages: Vec<Message>,
) -> Result<String, OracleError> {
    let before = HookContext::new(
        HookEvent::BeforeModel,
        HookPayload::Model(json!({ "message_count": messages.len() })),
    )
    .with_metadata("phase", json!(phase));
    hooks.trigger(HookEvent::BeforeModel, before).await;

    let response = oracle.invoke(&messages).await?;

    let after = HookContext::new(
        HookEvent::AfterModel,
        HookPayload::Model(json!({
            "content_len": response.content.len(),
            "finish_reason": response.finish_reason,
        })),
    )
    .with_metadata("phase", json!(phase));
    hooks.trigger(HookEvent::AfterModel, after).await;

    Ok(response.content)
}

/// Render the search history for inclusion in prompts, bounded per entry.
pub(crate) fn search_summary(state: &crate::state::WorkflowState) -> String {
    if state.search_context.is_empty() {
        return "no search results".to_string();
    }
    let mut parts = Vec::new();
    for (i, record) in state.search_context.iter().enumerate() {
        parts.push(format!("search {}: {}", i + 1, truncate(&record.query, 100)));
        if let Some(ref summary) = record.summary {
            parts.push(format!("  summary: {}", truncate(summary, 300)));
        } else {
            parts.push(format!("  result: {}", truncate(&record.result, 300)));
        }
    }
    parts.join("\n")
}

/// Truncate on a char boundary, appending an ellipsis marker when cut.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
