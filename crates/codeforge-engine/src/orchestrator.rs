//! Workflow orchestrator: wires phases, hooks, approval, and the sandbox
//! into the fixed plan → search → code → execute → reflect loop.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::warn;

use codeforge_approval::{ApprovalPolicy, ApprovalService, register_approval_hooks};
use codeforge_hooks::{Hook, HookContext, HookEvent};
use codeforge_oracle::{ModelBackend, SearchProvider};
use codeforge_sandbox::{Sandbox, SandboxConfig};
use codeforge_utils::CodeforgeError;
use codeforge_utils::error::PhaseError;
use codeforge_utils::logging::{log_phase_complete, log_phase_error, log_phase_start};
use codeforge_utils::types::PhaseType;

use crate::decision::{DecisionParser, TwoTierParser};
use crate::phase::Phase;
use crate::phases::{
    CodingPhase, ExecutingPhase, PlanningPhase, ReflectingPhase, SearchingPhase, run_summary,
};
use crate::state::{
    HookPayload, PhaseSignal, PlanningOutcome, WorkflowHooks, WorkflowState,
};

/// Hook metadata keys that are per-trigger plumbing, not workflow data.
const TRANSIENT_METADATA_KEYS: &[&str] = &["phase", "plan_preview"];

/// Tunables for one workflow instance.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Upper bound on phase steps before the run is aborted.
    pub max_iterations: usize,
    /// Auto-approval switches for the three gated operation classes.
    pub approval: ApprovalPolicy,
    /// Sandbox configuration for the execution phase.
    pub sandbox: SandboxConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            approval: ApprovalPolicy::permissive(),
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct WorkflowReport {
    /// Final workflow state.
    pub state: WorkflowState,
    /// Phase steps taken.
    pub iterations: usize,
    /// Human-readable run summary.
    pub summary: String,
}

/// Builder for [`Workflow`].
///
/// The oracle and search collaborators are required up front; everything
/// else has defaults. Custom hooks are registered here, before the
/// registry is frozen behind an `Arc` at build time.
pub struct WorkflowBuilder {
    oracle: Arc<dyn ModelBackend>,
    search: Arc<dyn SearchProvider>,
    parser: Arc<dyn DecisionParser>,
    approval: Option<Arc<ApprovalService>>,
    config: WorkflowConfig,
    hooks: WorkflowHooks,
}

impl WorkflowBuilder {
    fn new(oracle: Arc<dyn ModelBackend>, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            oracle,
            search,
            parser: Arc::new(TwoTierParser),
            approval: None,
            config: WorkflowConfig::default(),
            hooks: WorkflowHooks::new(),
        }
    }

    /// Override the workflow configuration.
    #[must_use]
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Swap the decision parser (e.g. to test heuristics in isolation).
    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn DecisionParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Inject an approval service instance (shared with an operator UI).
    #[must_use]
    pub fn approval_service(mut self, service: Arc<ApprovalService>) -> Self {
        self.approval = Some(service);
        self
    }

    /// Register a custom hook.
    #[must_use]
    pub fn hook(mut self, event: HookEvent, priority: i32, hook: Arc<dyn Hook<HookPayload>>) -> Self {
        self.hooks.register(event, priority, hook);
        self
    }

    /// Construct the workflow, provisioning its sandbox.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Provision` (wrapped) if the sandbox
    /// workspace cannot be created; this is fatal to the run.
    pub fn build(mut self) -> Result<Workflow, CodeforgeError> {
        let approval = self
            .approval
            .unwrap_or_else(|| Arc::new(ApprovalService::default()));
        register_approval_hooks(&mut self.hooks, &approval, self.config.approval);

        let sandbox = Arc::new(Sandbox::new(self.config.sandbox.clone())?);
        let hooks = Arc::new(self.hooks);

        Ok(Workflow {
            planning: PlanningPhase::new(
                Arc::clone(&self.oracle),
                Arc::clone(&hooks),
                Arc::clone(&self.parser),
            ),
            searching: SearchingPhase::new(
                Arc::clone(&self.oracle),
                Arc::clone(&self.search),
                Arc::clone(&hooks),
                Arc::clone(&self.parser),
            ),
            coding: CodingPhase::new(
                Arc::clone(&self.oracle),
                Arc::clone(&hooks),
                Arc::clone(&self.parser),
            ),
            executing: ExecutingPhase::new(Arc::clone(&sandbox), Arc::clone(&hooks)),
            reflecting: ReflectingPhase::new(
                Arc::clone(&self.oracle),
                Arc::clone(&hooks),
                Arc::clone(&self.parser),
            ),
            approval,
            hooks,
            config: self.config,
        })
    }
}

/// One workflow instance.
///
/// Owns its phases, its hook registry, its approval service, and its
/// sandbox. Independent workflows may run concurrently as cooperative
/// tasks; they share nothing but immutable configuration.
pub struct Workflow {
    planning: PlanningPhase,
    searching: SearchingPhase,
    coding: CodingPhase,
    executing: ExecutingPhase,
    reflecting: ReflectingPhase,
    approval: Arc<ApprovalService>,
    hooks: Arc<WorkflowHooks>,
    config: WorkflowConfig,
}

impl Workflow {
    /// Start building a workflow around the two required collaborators.
    #[must_use]
    pub fn builder(
        oracle: Arc<dyn ModelBackend>,
        search: Arc<dyn SearchProvider>,
    ) -> WorkflowBuilder {
        WorkflowBuilder::new(oracle, search)
    }

    /// The approval service gating this workflow's risky operations.
    #[must_use]
    pub fn approval_service(&self) -> &Arc<ApprovalService> {
        &self.approval
    }

    /// Run a user request from a fresh state to completion.
    ///
    /// # Errors
    ///
    /// Propagates guard violations, oracle transport failures, and the
    /// iteration-limit safeguard. Everything else degrades into the
    /// safest available next phase instead of failing the run.
    pub async fn run(
        &self,
        user_request: impl Into<String>,
    ) -> Result<WorkflowReport, CodeforgeError> {
        let mut state = WorkflowState::new(user_request);
        let iterations = self.run_state(&mut state).await?;
        let summary = run_summary(&state);
        Ok(WorkflowReport {
            state,
            iterations,
            summary,
        })
    }

    /// Drive a caller-owned state to completion.
    ///
    /// On error the state is left exactly as the failing step saw it,
    /// still in its current phase; there is no silent advance.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_state(&self, state: &mut WorkflowState) -> Result<usize, CodeforgeError> {
        let mut iterations = 0;
        while !state.current_phase.is_terminal() {
            if iterations >= self.config.max_iterations {
                return Err(PhaseError::IterationLimit {
                    limit: self.config.max_iterations,
                }
                .into());
            }

            let phase = self.phase_for(state.current_phase);
            self.step(phase, state).await?;
            let next = Self::transition(state)?;
            state.update_phase(next);
            iterations += 1;
        }
        Ok(iterations)
    }

    fn phase_for(&self, phase: PhaseType) -> &dyn Phase {
        match phase {
            PhaseType::Planning => &self.planning,
            PhaseType::Searching => &self.searching,
            PhaseType::Coding => &self.coding,
            PhaseType::Executing => &self.executing,
            // Finished is terminal; the run loop never asks for it.
            PhaseType::Reflecting | PhaseType::Finished => &self.reflecting,
        }
    }

    /// Execute one phase step: guard, authoritative phase update,
    /// before-hooks, the phase body, after-hooks.
    async fn step(&self, phase: &dyn Phase, state: &mut WorkflowState) -> Result<(), CodeforgeError> {
        if !phase.can_enter(state) {
            return Err(PhaseError::GuardViolation {
                phase: phase.phase_type(),
                current: state.current_phase,
            }
            .into());
        }

        state.update_phase(phase.phase_type());
        let name = phase.phase_type().as_str();
        let started = Instant::now();
        log_phase_start(name);

        self.agent_hooks(HookEvent::BeforeAgent, phase, state).await;

        if let Err(e) = phase.execute(state).await {
            log_phase_error(name, &e.to_string(), started.elapsed().as_millis());
            return Err(e);
        }

        self.agent_hooks(HookEvent::AfterAgent, phase, state).await;

        log_phase_complete(name, started.elapsed().as_millis());
        Ok(())
    }

    /// Run an agent-level hook chain with the state as payload, then fold
    /// the chain's outcome back into the state.
    async fn agent_hooks(&self, event: HookEvent, phase: &dyn Phase, state: &mut WorkflowState) {
        let mut ctx = HookContext::new(event, HookPayload::State(Box::new(state.clone())))
            .with_metadata("phase", json!(phase.phase_type().as_str()));

        // Entering Coding stages the current plan for the acceptance gate.
        if event == HookEvent::BeforeAgent
            && phase.phase_type() == PhaseType::Coding
            && !state.plan.is_empty()
        {
            let preview = crate::phases::truncate(&state.plan, 500);
            ctx.set_metadata("plan_preview", json!(preview));
        }

        let out = self.hooks.trigger(event, ctx).await;

        match out.data {
            // A hook may replace the state wholesale, but not its type.
            HookPayload::State(replaced) => *state = *replaced,
            other => {
                warn!(event = %event, "hook changed payload type ({other:?}), keeping prior state");
            }
        }
        for (key, value) in out.metadata {
            if !TRANSIENT_METADATA_KEYS.contains(&key.as_str()) {
                state.set_metadata(key, value);
            }
        }
    }

    /// Pure mapping from a phase's recorded signal to the next phase.
    fn transition(state: &mut WorkflowState) -> Result<PhaseType, PhaseError> {
        let signal = state.take_signal().ok_or(PhaseError::MissingSignal {
            phase: state.current_phase,
        })?;

        Ok(match signal {
            PhaseSignal::Planned(PlanningOutcome::Search(queries)) => {
                state.set_metadata("search_queries", json!(queries));
                PhaseType::Searching
            }
            PhaseSignal::Planned(PlanningOutcome::Code) => PhaseType::Coding,
            PhaseSignal::Searched { sufficient } => {
                if sufficient {
                    PhaseType::Coding
                } else {
                    PhaseType::Planning
                }
            }
            PhaseSignal::Coded => PhaseType::Executing,
            PhaseSignal::PlanRejected => PhaseType::Planning,
            PhaseSignal::Executed => PhaseType::Reflecting,
            PhaseSignal::Reflected(scenario) => scenario.next_phase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeforge_oracle::SearchHit;
    use codeforge_oracle::testing::{ScriptedBackend, StaticSearchProvider};
    use codeforge_utils::error::HookError;

    const PLAN_CODE: &str = r#"{"decision": "CODING", "plan": "emit ok"}"#;
    const PLAN_SEARCH: &str =
        r#"{"decision": "SEARCHING", "plan": "learn first", "search_queries": ["how to ok"]}"#;
    // Generated "code" runs through an argv override so the engine tests
    // do not depend on a python interpreter.
    const CODE_ECHO: &str = r#"{"files": {"main.py": "print('ok')"}, "main_entry": "main.py",
        "execution_command": ["echo", "ok"]}"#;
    const REFLECT_A: &str = r#"{"scenario": "A", "success": true, "analysis": "goal met"}"#;
    const REFLECT_B: &str = r#"{"scenario": "B", "success": false, "error_details": "broken"}"#;

    fn workflow(responses: &[&str], config: WorkflowConfig) -> Workflow {
        Workflow::builder(
            Arc::new(ScriptedBackend::new(responses.iter().copied())),
            Arc::new(StaticSearchProvider::new(vec![SearchHit {
                title: "t".into(),
                url: "u".into(),
                snippet: "s".into(),
            }])),
        )
        .config(config)
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn direct_coding_path_reaches_finished() {
        let wf = workflow(&[PLAN_CODE, CODE_ECHO, REFLECT_A], WorkflowConfig::default());
        let report = wf.run("print ok").await.unwrap();

        assert_eq!(report.state.current_phase, PhaseType::Finished);
        // plan → code → execute → reflect
        assert_eq!(report.iterations, 4);
        assert_eq!(report.state.last_execution().unwrap().stdout, "ok\n");
        assert!(report.summary.contains("goal: print ok"));
    }

    #[tokio::test]
    async fn search_detour_path_reaches_finished() {
        // planning → searching (summary + sufficiency) → coding → executing → reflecting
        let wf = workflow(
            &[PLAN_SEARCH, "summary", "sufficient to proceed", CODE_ECHO, REFLECT_A],
            WorkflowConfig::default(),
        );
        let report = wf.run("needs research").await.unwrap();

        assert_eq!(report.state.current_phase, PhaseType::Finished);
        assert_eq!(report.iterations, 5);
        assert_eq!(report.state.search_context.len(), 1);
        assert_eq!(report.state.search_context[0].query, "how to ok");
    }

    #[tokio::test]
    async fn scenario_b_loops_back_through_coding() {
        // First reflection says B (back to coding), second says A.
        let wf = workflow(
            &[PLAN_CODE, CODE_ECHO, REFLECT_B, CODE_ECHO, REFLECT_A],
            WorkflowConfig::default(),
        );
        let report = wf.run("flaky").await.unwrap();

        assert_eq!(report.state.current_phase, PhaseType::Finished);
        assert_eq!(report.iterations, 7);
        assert_eq!(report.state.execution_results.len(), 2);
        assert_eq!(report.state.reflection_notes.len(), 2);
    }

    #[tokio::test]
    async fn iteration_limit_aborts_runaway_runs() {
        let config = WorkflowConfig {
            max_iterations: 3,
            ..WorkflowConfig::default()
        };
        let wf = workflow(&[PLAN_CODE, CODE_ECHO, REFLECT_B, CODE_ECHO], config);
        let err = wf.run("never ends").await.unwrap_err();
        assert!(matches!(
            err,
            CodeforgeError::Phase(PhaseError::IterationLimit { limit: 3 })
        ));
    }

    #[tokio::test]
    async fn guard_violation_surfaces_and_preserves_phase() {
        let wf = workflow(&[], WorkflowConfig::default());
        let mut state = WorkflowState::new("x");
        // Driving the executing phase from Planning is an ordering bug.
        let err = wf.step(&wf.executing, &mut state).await.unwrap_err();
        assert!(matches!(
            err,
            CodeforgeError::Phase(PhaseError::GuardViolation { .. })
        ));
        assert_eq!(state.current_phase, PhaseType::Planning);
    }

    #[tokio::test]
    async fn step_sets_current_phase_to_phase_type() {
        let wf = workflow(&[PLAN_CODE], WorkflowConfig::default());
        let mut state = WorkflowState::new("x");
        wf.step(&wf.planning, &mut state).await.unwrap();
        assert_eq!(state.current_phase, wf.planning.phase_type());
    }

    #[tokio::test]
    async fn hooks_can_replace_state_wholesale() {
        let wf = Workflow::builder(
            Arc::new(ScriptedBackend::new([PLAN_CODE, CODE_ECHO, REFLECT_A])),
            Arc::new(StaticSearchProvider::new(vec![])),
        )
        .hook(
            HookEvent::BeforeAgent,
            50,
            Arc::new(codeforge_hooks::FnHook::new(|mut ctx| async move {
                if let HookPayload::State(ref mut state) = ctx.data {
                    state.user_goal = "rewritten by hook".to_string();
                }
                Ok(ctx)
            })),
        )
        .build()
        .unwrap();

        let report = wf.run("original goal").await.unwrap();
        assert_eq!(report.state.user_goal, "rewritten by hook");
    }

    #[tokio::test]
    async fn failing_observability_hook_does_not_halt_workflow() {
        let wf = Workflow::builder(
            Arc::new(ScriptedBackend::new([PLAN_CODE, CODE_ECHO, REFLECT_A])),
            Arc::new(StaticSearchProvider::new(vec![])),
        )
        .hook(
            HookEvent::BeforeAgent,
            999,
            Arc::new(codeforge_hooks::FnHook::new(|_ctx| async move {
                Err::<HookContext<HookPayload>, _>(HookError::failed("metrics sink down"))
            })),
        )
        .build()
        .unwrap();

        let report = wf.run("resilient").await.unwrap();
        assert_eq!(report.state.current_phase, PhaseType::Finished);
    }

    #[tokio::test]
    async fn missing_signal_is_a_phase_error() {
        let mut state = WorkflowState::new("x");
        let err = Workflow::transition(&mut state).unwrap_err();
        assert!(matches!(err, PhaseError::MissingSignal { .. }));
    }

    #[test]
    fn transition_covers_all_signals() {
        let cases: Vec<(PhaseSignal, PhaseType)> = vec![
            (
                PhaseSignal::Planned(PlanningOutcome::Search(vec!["q".into()])),
                PhaseType::Searching,
            ),
            (PhaseSignal::Planned(PlanningOutcome::Code), PhaseType::Coding),
            (PhaseSignal::Searched { sufficient: true }, PhaseType::Coding),
            (PhaseSignal::Searched { sufficient: false }, PhaseType::Planning),
            (PhaseSignal::Coded, PhaseType::Executing),
            (PhaseSignal::PlanRejected, PhaseType::Planning),
            (PhaseSignal::Executed, PhaseType::Reflecting),
            (
                PhaseSignal::Reflected(crate::state::Scenario::Success),
                PhaseType::Finished,
            ),
        ];
        for (signal, expected) in cases {
            let mut state = WorkflowState::new("x");
            state.set_signal(signal);
            assert_eq!(Workflow::transition(&mut state).unwrap(), expected);
        }
    }
}
