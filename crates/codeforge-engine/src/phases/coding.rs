use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use codeforge_oracle::{Message, ModelBackend};
use codeforge_utils::CodeforgeError;
use codeforge_utils::types::PhaseType;

use crate::decision::DecisionParser;
use crate::phase::Phase;
use crate::phases::{invoke_oracle, search_summary, truncate};
use crate::state::{PhaseSignal, WorkflowHooks, WorkflowState};

const SYSTEM_PROMPT: &str = "You are the coding stage of an autonomous coding agent. \
Generate complete, runnable code. Respond with a JSON object: \
{\"files\": {path: content, ...}, \"main_entry\": ..., \"dependencies\": [...], \
\"execution_command\": [argv...], \"description\": ...}.";

/// Coding phase: generate code from the plan, or refine the previous code
/// against the last execution failure.
pub struct CodingPhase {
    oracle: Arc<dyn ModelBackend>,
    hooks: Arc<WorkflowHooks>,
    parser: Arc<dyn DecisionParser>,
}

impl CodingPhase {
    /// Create the phase around its collaborators.
    #[must_use]
    pub fn new(
        oracle: Arc<dyn ModelBackend>,
        hooks: Arc<WorkflowHooks>,
        parser: Arc<dyn DecisionParser>,
    ) -> Self {
        Self {
            oracle,
            hooks,
            parser,
        }
    }

    fn api_details(state: &WorkflowState) -> String {
        let details: Vec<String> = state
            .search_context
            .iter()
            .filter(|r| {
                let text = r.result.to_lowercase();
                text.contains("api") || text.contains("method") || text.contains("function")
            })
            .map(|r| truncate(&r.result, 1000))
            .collect();
        if details.is_empty() {
            "no specific API details".to_string()
        } else {
            details.join("\n\n")
        }
    }

    fn current_code(state: &WorkflowState) -> String {
        state
            .current_file
            .as_ref()
            .and_then(|f| state.code_files.get(f))
            .cloned()
            .unwrap_or_default()
    }

    /// True when re-entering after a failed run with code on hand.
    fn is_refinement(state: &WorkflowState) -> bool {
        !state.code_files.is_empty()
            && state.last_execution().is_some_and(|last| !last.success())
    }

    fn build_prompt(state: &WorkflowState) -> String {
        match state.last_execution() {
            Some(last) if Self::is_refinement(state) => format!(
                "The previous code failed. Fix it.\n\nGoal: {}\n\nCurrent code:\n{}\n\n\
                 stderr:\n{}\n\nDiagnosis:\n{}",
                state.user_goal,
                truncate(&Self::current_code(state), 4000),
                truncate(&last.stderr, 2000),
                state.error_analysis.as_deref().unwrap_or("none"),
            ),
            _ => format!(
                "Goal: {}\n\nPlan:\n{}\n\nSearch findings:\n{}\n\nAPI details:\n{}",
                state.user_goal,
                state.plan,
                search_summary(state),
                Self::api_details(state),
            ),
        }
    }
}

#[async_trait]
impl Phase for CodingPhase {
    fn phase_type(&self) -> PhaseType {
        PhaseType::Coding
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<(), CodeforgeError> {
        // The approval gate may have rejected the staged plan in the
        // before-agent chain; branch on the metadata outcome.
        if let Some(approved) = state.take_metadata("plan_approved") {
            if approved == json!(false) {
                let reason = state
                    .take_metadata("rejection_reason")
                    .and_then(|v| v.as_str().map(ToString::to_string))
                    .unwrap_or_else(|| "plan rejected".to_string());
                info!(reason, "plan rejected, returning to planning");
                state.error_analysis = Some(reason);
                state.set_signal(PhaseSignal::PlanRejected);
                return Ok(());
            }
        }

        let refinement = Self::is_refinement(state);
        let response = invoke_oracle(
            &self.hooks,
            self.oracle.as_ref(),
            "coding",
            vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(Self::build_prompt(state)),
            ],
        )
        .await?;

        let plan = self.parser.parse_code(&response);
        for (path, content) in &plan.files {
            info!(file = %path, refinement, "generated file");
            state.code_files.insert(path.clone(), content.clone());
        }
        if let Some(entry) = plan.main_entry {
            state.current_file = Some(entry);
        }
        if !plan.dependencies.is_empty() {
            state.set_metadata("dependencies", json!(plan.dependencies));
        }
        if let Some(command) = plan.execution_command {
            state.set_metadata("execution_command", json!(command));
        }
        if !plan.description.is_empty() {
            state.set_metadata("code_description", json!(plan.description));
        }

        state.set_signal(PhaseSignal::Coded);
        Ok(())
    }
}
