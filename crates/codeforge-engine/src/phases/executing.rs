use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use codeforge_hooks::{HookContext, HookEvent};
use codeforge_sandbox::Sandbox;
use codeforge_utils::CodeforgeError;
use codeforge_utils::error::PhaseError;
use codeforge_utils::types::PhaseType;

use crate::phase::Phase;
use crate::phases::truncate;
use crate::state::{HookPayload, PhaseSignal, WorkflowHooks, WorkflowState};

/// Entry-file names tried when the state names no current file.
const ENTRY_CANDIDATES: &[&str] = &["main.py", "__main__.py", "app.py"];

/// Executing phase: run the generated code in the sandbox, gated by the
/// `BeforeToolCall` hook chain.
pub struct ExecutingPhase {
    sandbox: Arc<Sandbox>,
    hooks: Arc<WorkflowHooks>,
}

impl ExecutingPhase {
    /// Create the phase around its collaborators.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>, hooks: Arc<WorkflowHooks>) -> Self {
        Self { sandbox, hooks }
    }

    /// Pick the entry file and return its content, fixing up
    /// `current_file` when it had to be inferred.
    fn prepare_code(state: &mut WorkflowState) -> Option<String> {
        if let Some(ref file) = state.current_file {
            if let Some(content) = state.code_files.get(file) {
                return Some(content.clone());
            }
        }
        for candidate in ENTRY_CANDIDATES {
            if let Some(content) = state.code_files.get(*candidate) {
                state.current_file = Some((*candidate).to_string());
                return Some(content.clone());
            }
        }
        // Any python file, then any file at all.
        let fallback = state
            .code_files
            .iter()
            .find(|(name, _)| name.ends_with(".py"))
            .or_else(|| state.code_files.iter().next())
            .map(|(name, content)| (name.clone(), content.clone()));
        if let Some((name, content)) = fallback {
            state.current_file = Some(name);
            return Some(content);
        }
        None
    }
}

#[async_trait]
impl Phase for ExecutingPhase {
    fn phase_type(&self) -> PhaseType {
        PhaseType::Executing
    }

    /// Entry additionally requires code to exist at all; an empty file
    /// map is an ordering bug in the caller.
    fn can_enter(&self, state: &WorkflowState) -> bool {
        state.current_phase == PhaseType::Executing && !state.code_files.is_empty()
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<(), CodeforgeError> {
        let Some(code) = Self::prepare_code(state) else {
            state.error_analysis = Some("no executable code in generated files".to_string());
            return Err(PhaseError::NoExecutableCode {
                phase: PhaseType::Executing,
            }
            .into());
        };

        let file_names: Vec<&str> = state.code_files.keys().map(String::as_str).collect();
        let before = HookContext::new(
            HookEvent::BeforeToolCall,
            HookPayload::Tool(json!({ "code": truncate(&code, 500) })),
        )
        .with_metadata("tool_name", json!("execute_code"))
        .with_metadata("phase", json!("executing"))
        .with_metadata("files", json!(file_names))
        .with_metadata("code_preview", json!(truncate(&code, 200)));
        let gated = self.hooks.trigger(HookEvent::BeforeToolCall, before).await;

        // Approval outcome arrives on the hook metadata side-channel;
        // absent means ungated.
        if !gated.metadata_flag("execution_approved", true) {
            let reason = gated
                .metadata_str("rejection_reason")
                .unwrap_or("execution was not approved")
                .to_string();
            warn!(reason, "execution denied by approval gate");
            state.error_analysis = Some(reason);
            state.set_metadata("execution_rejected", json!(true));
            state.set_signal(PhaseSignal::Executed);
            return Ok(());
        }

        let command: Option<Vec<String>> = state
            .get_metadata("execution_command")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());

        info!(files = state.code_files.len(), "executing generated code");
        let result = self
            .sandbox
            .execute(&code, &state.code_files, command.as_deref())
            .await;

        info!(
            return_code = result.return_code,
            duration = result.execution_time,
            "execution completed"
        );

        let after = HookContext::new(
            HookEvent::AfterToolCall,
            HookPayload::Tool(json!({
                "stdout": truncate(&result.stdout, 500),
                "stderr": truncate(&result.stderr, 500),
                "return_code": result.return_code,
            })),
        )
        .with_metadata("tool_name", json!("execute_code"))
        .with_metadata("phase", json!("executing"));
        self.hooks.trigger(HookEvent::AfterToolCall, after).await;

        state.add_execution_result(result);
        state.set_signal(PhaseSignal::Executed);
        Ok(())
    }
}
