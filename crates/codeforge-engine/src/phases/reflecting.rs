use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use codeforge_oracle::{Message, ModelBackend};
use codeforge_sandbox::classify_failure;
use codeforge_utils::CodeforgeError;
use codeforge_utils::types::PhaseType;

use crate::decision::DecisionParser;
use crate::phase::Phase;
use crate::phases::truncate;
use crate::state::{PhaseSignal, Scenario, WorkflowHooks, WorkflowState};

use super::invoke_oracle;

const SYSTEM_PROMPT: &str = "You are the reflection stage of an autonomous coding agent. \
Judge the execution outcome against the goal and classify it: scenario A = success, \
B = syntax/runtime surface error, C = knowledge gap or API misuse, D = logic error. \
Respond with JSON: {\"scenario\": \"A\"|\"B\"|\"C\"|\"D\", \"success\": bool, \
\"analysis\": ..., \"error_details\": ..., \"improvements\": [...]}.";

/// Reflecting phase: judge the last execution and classify the outcome
/// into one of the four scenarios that drive the next transition.
pub struct ReflectingPhase {
    oracle: Arc<dyn ModelBackend>,
    hooks: Arc<WorkflowHooks>,
    parser: Arc<dyn DecisionParser>,
}

impl ReflectingPhase {
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

    fn executed_code(state: &WorkflowState) -> String {
        state
            .current_file
            .as_ref()
            .and_then(|f| state.code_files.get(f))
            .or_else(|| state.code_files.values().next())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Phase for ReflectingPhase {
    fn phase_type(&self) -> PhaseType {
        PhaseType::Reflecting
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<(), CodeforgeError> {
        let Some(last) = state.last_execution().cloned() else {
            // Nothing ran (e.g. execution was denied); go back to coding.
            state
                .reflection_notes
                .push("no execution result to reflect on".to_string());
            state.set_signal(PhaseSignal::Reflected(Scenario::LogicFault));
            return Ok(());
        };

        // Advisory keyword classification of stderr, offered to the oracle
        // as a hint alongside the raw output.
        let hint = classify_failure(&last)
            .map_or_else(|| "none".to_string(), |kind| kind.to_string());

        let expected = state
            .get_metadata("expected_output")
            .and_then(|v| v.as_str())
            .unwrap_or("unspecified")
            .to_string();
        let user = format!(
            "Goal: {}\n\nreturn_code: {}\nduration: {:.2}s\nheuristic error category: {hint}\n\
             stdout:\n{}\n\nstderr:\n{}\n\nExecuted code:\n{}\n\nExpected output: {expected}",
            state.user_goal,
            last.return_code,
            last.execution_time,
            truncate(&last.stdout, 2000),
            truncate(&last.stderr, 2000),
            truncate(&Self::executed_code(state), 1000),
        );

        let response = invoke_oracle(
            &self.hooks,
            self.oracle.as_ref(),
            "reflecting",
            vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
        )
        .await?;

        let verdict = self.parser.parse_reflection(&response);
        state.reflection_notes.push(response);
        // Overwritten each reflection cycle.
        state.error_analysis = if verdict.error_details.is_empty() {
            None
        } else {
            Some(verdict.error_details.clone())
        };
        if !verdict.improvements.is_empty() {
            state.set_metadata("improvements", json!(verdict.improvements));
        }

        info!(
            scenario = %verdict.scenario.letter(),
            success = verdict.success,
            "reflection complete"
        );
        state.set_signal(PhaseSignal::Reflected(verdict.scenario));
        Ok(())
    }
}

/// Assemble a human-readable summary of a finished run.
#[must_use]
pub fn run_summary(state: &WorkflowState) -> String {
    let mut parts = vec![format!("goal: {}", state.user_goal)];

    if let Some(last) = state.last_execution() {
        parts.push(format!(
            "final execution: return_code={}, duration={:.2}s",
            last.return_code, last.execution_time
        ));
        if !last.stdout.trim().is_empty() {
            parts.push(format!("output: {}", truncate(&last.stdout, 200)));
        }
        if !last.stderr.trim().is_empty() {
            parts.push(format!("errors: {}", truncate(&last.stderr, 200)));
        }
    }

    if let Some(note) = state.reflection_notes.last() {
        parts.push(format!("conclusion: {}", truncate(note, 300)));
    }

    if !state.code_files.is_empty() {
        let names: Vec<&str> = state.code_files.keys().map(String::as_str).collect();
        parts.push(format!("generated files: {}", names.join(", ")));
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::TwoTierParser;
    use chrono::Utc;
    use codeforge_oracle::testing::ScriptedBackend;
    use codeforge_sandbox::ExecutionResult;

    fn phase(responses: &[&str]) -> ReflectingPhase {
        ReflectingPhase::new(
            Arc::new(ScriptedBackend::new(responses.iter().copied())),
            Arc::new(WorkflowHooks::new()),
            Arc::new(TwoTierParser),
        )
    }

    fn run_result(code: i32, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: "out".into(),
            stderr: stderr.into(),
            return_code: code,
            execution_time: 0.2,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn success_verdict_signals_scenario_a() {
        let phase = phase(&[r#"{"scenario": "A", "success": true, "analysis": "all good"}"#]);
        let mut state = WorkflowState::new("goal");
        state.update_phase(PhaseType::Reflecting);
        state.add_execution_result(run_result(0, ""));

        phase.execute(&mut state).await.unwrap();
        assert_eq!(
            state.take_signal(),
            Some(PhaseSignal::Reflected(Scenario::Success))
        );
        assert_eq!(state.reflection_notes.len(), 1);
        assert!(state.error_analysis.is_none());
    }

    #[tokio::test]
    async fn error_details_overwrite_error_analysis() {
        let phase = phase(&[
            r#"{"scenario": "B", "success": false, "error_details": "missing colon"}"#,
        ]);
        let mut state = WorkflowState::new("goal");
        state.update_phase(PhaseType::Reflecting);
        state.error_analysis = Some("stale diagnosis".into());
        state.add_execution_result(run_result(1, "SyntaxError: invalid syntax"));

        phase.execute(&mut state).await.unwrap();
        assert_eq!(state.error_analysis.as_deref(), Some("missing colon"));
        assert_eq!(
            state.take_signal(),
            Some(PhaseSignal::Reflected(Scenario::CodeFault))
        );
    }

    #[tokio::test]
    async fn missing_execution_defaults_to_logic_fault() {
        let phase = phase(&[]);
        let mut state = WorkflowState::new("goal");
        state.update_phase(PhaseType::Reflecting);

        phase.execute(&mut state).await.unwrap();
        assert_eq!(
            state.take_signal(),
            Some(PhaseSignal::Reflected(Scenario::LogicFault))
        );
    }

    #[tokio::test]
    async fn ambiguous_text_defaults_to_logic_fault() {
        let phase = phase(&["it is difficult to tell what went wrong here"]);
        let mut state = WorkflowState::new("goal");
        state.update_phase(PhaseType::Reflecting);
        state.add_execution_result(run_result(3, "weird"));

        phase.execute(&mut state).await.unwrap();
        assert_eq!(
            state.take_signal(),
            Some(PhaseSignal::Reflected(Scenario::LogicFault))
        );
    }

    #[test]
    fn run_summary_includes_key_sections() {
        let mut state = WorkflowState::new("make a tool");
        state.add_execution_result(run_result(0, ""));
        state.reflection_notes.push("done well".into());
        state.code_files.insert("main.py".into(), "x".into());

        let summary = run_summary(&state);
        assert!(summary.contains("goal: make a tool"));
        assert!(summary.contains("return_code=0"));
        assert!(summary.contains("conclusion: done well"));
        assert!(summary.contains("generated files: main.py"));
    }
}
