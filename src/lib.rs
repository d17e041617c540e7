//! codeforge - autonomous coding-agent workflow engine
//!
//! This crate coordinates an autonomous coding agent through a fixed
//! pipeline of work phases (plan → search → code → execute → reflect),
//! using a language-model oracle to decide transitions and a sandboxed
//! subprocess to run generated code.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use codeforge::{Workflow, WorkflowConfig};
//! # use codeforge::oracle::testing::{ScriptedBackend, StaticSearchProvider};
//!
//! # async fn example() -> Result<(), codeforge::CodeforgeError> {
//! # let model = Arc::new(ScriptedBackend::new(["..."]));
//! # let search = Arc::new(StaticSearchProvider::new(vec![]));
//! let workflow = Workflow::builder(model, search)
//!     .config(WorkflowConfig::default())
//!     .build()?;
//!
//! let report = workflow.run("write a CSV de-duplicator").await?;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```
//!
//! The oracle and search provider are collaborator traits
//! ([`ModelBackend`], [`SearchProvider`]); bring your own adapters.
//! Everything else — the phase state machine, the hook pipeline, the
//! approval gate, and the execution sandbox — lives in this workspace.
//!
//! # Stable Public API
//!
//! The types re-exported at the crate root are the stable surface:
//!
//! - [`Workflow`], [`WorkflowBuilder`], [`WorkflowConfig`], [`WorkflowReport`]
//! - [`WorkflowState`], [`PhaseType`], [`Scenario`]
//! - [`Sandbox`], [`SandboxConfig`], [`ExecutionResult`]
//! - [`ApprovalService`], [`ApprovalPolicy`], [`ApprovalRequest`]
//! - [`HookEvent`], [`HookContext`], [`HookRegistry`]
//! - [`CodeforgeError`]
//!
//! Component crates are accessible via module paths for advanced use but
//! are not covered by the same stability guarantees.

// ============================================================================
// Stable Public API
// ============================================================================

pub use codeforge_engine::{
    CodePlan, DecisionParser, HookPayload, Phase, PhaseSignal, PlanningBranch, PlanningDecision,
    PlanningOutcome, ReflectionVerdict, Scenario, TwoTierParser, Workflow, WorkflowBuilder,
    WorkflowConfig, WorkflowHooks, WorkflowReport, WorkflowState, run_summary,
};

pub use codeforge_approval::{
    ApprovalPolicy, ApprovalRequest, ApprovalService, ApprovalStatus, OperationClass,
    OperatorChannel, OperatorDecision,
};

pub use codeforge_hooks::{FnHook, Hook, HookContext, HookEvent, HookRegistry};

pub use codeforge_oracle::{
    Message, ModelBackend, ModelResponse, Role, SearchHit, SearchProvider,
};

pub use codeforge_sandbox::{
    CommandSpec, ExecutionResult, FailureKind, Sandbox, SandboxConfig, classify_failure,
};

pub use codeforge_utils::CodeforgeError;
pub use codeforge_utils::logging::init_tracing;
pub use codeforge_utils::types::PhaseType;

// ============================================================================
// Component crates - accessible but not independently versioned
// ============================================================================

pub use codeforge_approval as approval;
pub use codeforge_engine as engine;
pub use codeforge_hooks as hooks;
pub use codeforge_oracle as oracle;
pub use codeforge_sandbox as sandbox;
pub use codeforge_utils as utils;
