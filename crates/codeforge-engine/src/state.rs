use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use codeforge_hooks::HookRegistry;
use codeforge_sandbox::ExecutionResult;
use codeforge_utils::types::PhaseType;

/// Hook registry instantiated over the engine's payload type.
pub type WorkflowHooks = HookRegistry<HookPayload>;

/// Payload threaded through the engine's hook chains.
///
/// Phase-transition events carry the workflow state itself; tool and
/// model events carry a JSON description of the call. Handlers may
/// replace the payload wholesale but must keep its variant: the engine
/// discards a variant-changing replacement and keeps the last good one.
#[derive(Debug, Clone)]
pub enum HookPayload {
    /// The full workflow state, for `BeforeAgent`/`AfterAgent`.
    State(Box<WorkflowState>),
    /// A tool invocation description, for tool-call events.
    Tool(Value),
    /// A model invocation description, for model-call events.
    Model(Value),
}

/// Outcome recorded by the planning phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningOutcome {
    /// More information is needed; run a search round with these queries.
    Search(Vec<String>),
    /// The plan suffices; proceed to code generation.
    Code,
}

/// Four-way classification of an execution outcome, decided by the
/// reflection phase from the oracle's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Scenario A: the goal is met.
    Success,
    /// Scenario B: syntax or runtime surface error in the code.
    CodeFault,
    /// Scenario C: knowledge gap or API misuse; go gather information.
    KnowledgeGap,
    /// Scenario D: the code runs but the logic is wrong.
    LogicFault,
}

impl Scenario {
    /// Parse the single-letter form used in oracle verdicts.
    #[must_use]
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::Success),
            "B" => Some(Self::CodeFault),
            "C" => Some(Self::KnowledgeGap),
            "D" => Some(Self::LogicFault),
            _ => None,
        }
    }

    /// The single-letter form.
    #[must_use]
    pub const fn letter(&self) -> char {
        match self {
            Self::Success => 'A',
            Self::CodeFault => 'B',
            Self::KnowledgeGap => 'C',
            Self::LogicFault => 'D',
        }
    }

    /// Pure mapping from scenario to the next workflow phase:
    /// A→Finished, B→Coding, C→Searching, D→Coding.
    #[must_use]
    pub const fn next_phase(&self) -> PhaseType {
        match self {
            Self::Success => PhaseType::Finished,
            Self::CodeFault | Self::LogicFault => PhaseType::Coding,
            Self::KnowledgeGap => PhaseType::Searching,
        }
    }
}

/// Typed transition signal recorded by each phase for the orchestrator.
///
/// This is the compile-checked channel for phase-selection decisions; the
/// untyped metadata map remains available for hook side-band data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseSignal {
    /// Planning finished with a branch decision.
    Planned(PlanningOutcome),
    /// A search round completed; `sufficient` reports the oracle's
    /// information-sufficiency check.
    Searched {
        /// Whether the gathered information suffices to start coding.
        sufficient: bool,
    },
    /// Code was generated or refined.
    Coded,
    /// The staged plan was rejected by the approval gate.
    PlanRejected,
    /// An execution round completed (or was denied by the gate).
    Executed,
    /// Reflection classified the outcome.
    Reflected(Scenario),
}

/// One search round entry: query, raw result, optional summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    /// The query that was issued.
    pub query: String,
    /// Rendered raw result text (capped before storage).
    pub result: String,
    /// Oracle-produced summary, when one was generated.
    pub summary: Option<String>,
    /// When the query ran.
    pub at: DateTime<Utc>,
}

/// Mutable record of one workflow run.
///
/// Owned exclusively by the orchestrator for the lifetime of one task and
/// lent to each phase; there is never a concurrent writer.
/// `current_phase` is updated only through [`update_phase`]
/// (`WorkflowState::update_phase`), the single authoritative transition
/// point, never directly by phase logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// The verbatim user request.
    pub user_request: String,
    /// Distilled goal, written by planning.
    pub user_goal: String,
    /// Phase the workflow is currently in.
    pub current_phase: PhaseType,
    /// Current plan text.
    pub plan: String,
    /// Plan after refinement against search results.
    pub refined_plan: String,
    /// Append-only search history for this run.
    pub search_context: Vec<SearchRecord>,
    /// Generated files, path → content; last write wins.
    pub code_files: BTreeMap<String, String>,
    /// Entry-point file within `code_files`.
    pub current_file: Option<String>,
    /// Append-only log of every sandbox run.
    pub execution_results: Vec<ExecutionResult>,
    /// Append-only free-text reflections.
    pub reflection_notes: Vec<String>,
    /// Latest diagnostic, overwritten each reflection cycle.
    pub error_analysis: Option<String>,
    /// Open side-channel map for inter-phase signaling. No schema is
    /// enforced; readers must defensively check presence.
    pub metadata: HashMap<String, Value>,
    /// When this state was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Pending transition signal, consumed by the orchestrator.
    #[serde(skip)]
    signal: Option<PhaseSignal>,
}

impl WorkflowState {
    /// Create a fresh state for a user request, starting in Planning.
    #[must_use]
    pub fn new(user_request: impl Into<String>) -> Self {
        let user_request = user_request.into();
        let now = Utc::now();
        Self {
            user_goal: user_request.clone(),
            user_request,
            current_phase: PhaseType::Planning,
            plan: String::new(),
            refined_plan: String::new(),
            search_context: Vec::new(),
            code_files: BTreeMap::new(),
            current_file: None,
            execution_results: Vec::new(),
            reflection_notes: Vec::new(),
            error_analysis: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            signal: None,
        }
    }

    /// Move the workflow to a new phase.
    ///
    /// Invariant: called only by the orchestrator, so there is exactly
    /// one authoritative transition point per step.
    pub fn update_phase(&mut self, phase: PhaseType) {
        self.current_phase = phase;
        self.touch();
    }

    /// Append an execution result; it becomes the latest one.
    pub fn add_execution_result(&mut self, result: ExecutionResult) {
        self.execution_results.push(result);
        self.touch();
    }

    /// The most recent execution, if any.
    #[must_use]
    pub fn last_execution(&self) -> Option<&ExecutionResult> {
        self.execution_results.last()
    }

    /// Append a search record.
    pub fn add_search_result(
        &mut self,
        query: impl Into<String>,
        result: impl Into<String>,
        summary: Option<String>,
    ) {
        self.search_context.push(SearchRecord {
            query: query.into(),
            result: result.into(),
            summary,
            at: Utc::now(),
        });
        self.touch();
    }

    /// Write a metadata entry; last write wins.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
        self.touch();
    }

    /// Read a metadata entry.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Read-and-remove a metadata entry.
    pub fn take_metadata(&mut self, key: &str) -> Option<Value> {
        let value = self.metadata.remove(key);
        if value.is_some() {
            self.touch();
        }
        value
    }

    /// Record the transition signal for the orchestrator.
    pub fn set_signal(&mut self, signal: PhaseSignal) {
        self.signal = Some(signal);
    }

    /// Consume the pending transition signal.
    pub fn take_signal(&mut self) -> Option<PhaseSignal> {
        self.signal.take()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
