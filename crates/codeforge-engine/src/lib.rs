//! Workflow state machine and orchestrator.
//!
//! The engine drives an autonomous coding agent through a fixed pipeline
//! of phases (plan → search → code → execute → reflect), consulting a
//! language-model oracle for transitions, wrapping every step and tool
//! call in the hook pipeline, and delegating code execution to the
//! sandbox. Failures from the sandbox feed back into phase selection via
//! the reflection scenario classification.

mod decision;
mod orchestrator;
mod phase;
mod phases;
mod state;

pub use decision::{
    CodePlan, DecisionParser, PlanningBranch, PlanningDecision, ReflectionVerdict, TwoTierParser,
};
pub use orchestrator::{Workflow, WorkflowBuilder, WorkflowConfig, WorkflowReport};
pub use phase::Phase;
pub use phases::{
    CodingPhase, ExecutingPhase, PlanningPhase, ReflectingPhase, SearchingPhase, run_summary,
};
pub use state::{
    HookPayload, PhaseSignal, PlanningOutcome, Scenario, SearchRecord, WorkflowHooks,
    WorkflowState,
};
