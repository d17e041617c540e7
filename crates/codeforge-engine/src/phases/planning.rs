use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use codeforge_oracle::{Message, ModelBackend};
use codeforge_utils::CodeforgeError;
use codeforge_utils::types::PhaseType;

use crate::decision::{DecisionParser, PlanningBranch};
use crate::phase::Phase;
use crate::phases::{invoke_oracle, search_summary, truncate};
use crate::state::{PhaseSignal, PlanningOutcome, WorkflowHooks, WorkflowState};

const SYSTEM_PROMPT: &str = "You are the planning stage of an autonomous coding agent. \
Analyze the user request and decide whether enough is known to write code now. \
Respond with a JSON object: {\"decision\": \"SEARCHING\"|\"CODING\", \"plan\": ..., \
\"reason\": ..., \"missing_info\": [...], \"search_queries\": [...]}.";

const REFINEMENT_PROMPT: &str = "Refine the plan below using the search findings. \
Respond with the improved plan text only.";

/// Planning phase: analyze the request, produce a plan, and decide
/// between gathering information and writing code.
///
/// When re-entered after a search round with an existing plan, the plan
/// is first refined against the accumulated search summaries before the
/// branch decision is re-made.
pub struct PlanningPhase {
    oracle: Arc<dyn ModelBackend>,
    hooks: Arc<WorkflowHooks>,
    parser: Arc<dyn DecisionParser>,
}

impl PlanningPhase {
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

    fn context_summary(state: &WorkflowState) -> String {
        let mut parts = Vec::new();
        if !state.user_goal.is_empty() {
            parts.push(format!("goal: {}", state.user_goal));
        }
        if !state.plan.is_empty() {
            parts.push(format!("current plan: {}", state.plan));
        }
        if !state.code_files.is_empty() {
            let names: Vec<&str> = state.code_files.keys().map(String::as_str).collect();
            parts.push(format!("existing files: {}", names.join(", ")));
        }
        if let Some(last) = state.last_execution() {
            parts.push(format!(
                "last execution: return_code={}, duration={:.2}s",
                last.return_code, last.execution_time
            ));
        }
        if parts.is_empty() {
            "no prior context".to_string()
        } else {
            parts.join("\n")
        }
    }

    async fn refine_plan(&self, state: &mut WorkflowState) -> Result<(), CodeforgeError> {
        debug!("refining plan against search results");
        let user = format!(
            "{REFINEMENT_PROMPT}\n\nOriginal plan:\n{}\n\nSearch findings:\n{}",
            state.plan,
            search_summary(state)
        );
        let response = invoke_oracle(
            &self.hooks,
            self.oracle.as_ref(),
            "planning",
            vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
        )
        .await?;

        state.refined_plan = response.clone();
        state.plan = response;
        Ok(())
    }
}

#[async_trait]
impl Phase for PlanningPhase {
    fn phase_type(&self) -> PhaseType {
        PhaseType::Planning
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<(), CodeforgeError> {
        if !state.search_context.is_empty() && !state.plan.is_empty() {
            self.refine_plan(state).await?;
        }

        let user = format!(
            "User request:\n{}\n\nContext:\n{}\n\nSearch results:\n{}",
            state.user_request,
            Self::context_summary(state),
            search_summary(state)
        );
        let response = invoke_oracle(
            &self.hooks,
            self.oracle.as_ref(),
            "planning",
            vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
        )
        .await?;

        let decision = self.parser.parse_planning(&response);
        if !decision.plan.is_empty() {
            state.plan = decision.plan.clone();
        }
        state.set_metadata(
            "planning_decision",
            json!({
                "decision": match decision.branch {
                    PlanningBranch::Searching => "SEARCHING",
                    PlanningBranch::Coding => "CODING",
                },
                "reason": truncate(&decision.reason, 500),
            }),
        );

        match decision.branch {
            PlanningBranch::Searching => {
                info!(
                    queries = decision.search_queries.len(),
                    "planning: more information needed"
                );
                state.set_metadata("missing_info", json!(decision.missing_info));
                state.set_signal(PhaseSignal::Planned(PlanningOutcome::Search(
                    decision.search_queries,
                )));
            }
            PlanningBranch::Coding => {
                info!("planning: ready to code");
                state.set_signal(PhaseSignal::Planned(PlanningOutcome::Code));
            }
        }
        Ok(())
    }
}
