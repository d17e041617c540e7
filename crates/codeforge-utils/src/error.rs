use std::time::Duration;
use thiserror::Error;

use crate::types::PhaseType;

/// Library-level error type with rich context.
///
/// `CodeforgeError` is the primary error returned by workflow operations.
/// Component crates define their own error enums below; this type rolls
/// them up so that orchestrator-level code can return a single error.
///
/// # Error Categories
///
/// | Category | Description | Fatal to a run? |
/// |----------|-------------|-----------------|
/// | `Phase` | Guard violations and phase-level failures | yes |
/// | `Sandbox` | Sandbox provisioning failures | yes |
/// | `Oracle` | Model transport failures | surfaced per call |
/// | `Search` | Search provider failures | no (textual marker) |
/// | `Approval` | Approval bookkeeping misuse | no |
/// | `Hook` | Individual handler failures | no (isolated) |
///
/// Library code returns `CodeforgeError` and never calls
/// `std::process::exit()`.
#[derive(Error, Debug)]
pub enum CodeforgeError {
    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the phase state machine.
///
/// A `GuardViolation` signals a programming or ordering bug (a phase was
/// driven while its precondition did not hold), not a user-facing failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("cannot enter {phase} phase while in {current}")]
    GuardViolation {
        phase: PhaseType,
        current: PhaseType,
    },

    #[error("{phase} phase produced no transition signal")]
    MissingSignal { phase: PhaseType },

    #[error("no executable code available in {phase} phase")]
    NoExecutableCode { phase: PhaseType },

    #[error("workflow exceeded {limit} iterations without finishing")]
    IterationLimit { limit: usize },
}

/// Errors raised by the execution sandbox.
///
/// Child-process failures (spawn errors, timeouts, I/O on the pipes) are
/// reported as synthetic `ExecutionResult`s, not as errors; this enum only
/// covers failures to stand the sandbox up at all.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("failed to provision sandbox workspace: {reason}")]
    Provision { reason: String },

    #[error("sandbox workspace IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the model oracle collaborator.
#[derive(Error, Debug, Clone)]
pub enum OracleError {
    #[error("model transport failed: {reason}")]
    Transport { reason: String },

    #[error("model call timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Errors raised by the search provider collaborator.
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("search provider failed: {reason}")]
    Provider { reason: String },
}

/// Errors raised by the approval gate bookkeeping.
///
/// Denial and timeout are *not* errors; they are first-class request
/// outcomes. These variants cover misuse of the service itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval request {id} not found")]
    NotFound { id: String },

    #[error("approval request {id} already resolved as {status}")]
    AlreadyResolved { id: String, status: String },
}

/// Errors raised by individual hook handlers.
///
/// The registry catches these and continues the chain; they never
/// propagate out of `trigger`.
#[derive(Error, Debug, Clone)]
pub enum HookError {
    #[error("hook handler failed: {reason}")]
    Failed { reason: String },
}

impl HookError {
    /// Convenience constructor used by closure hooks.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl OracleError {
    /// Build a timeout error from a duration.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_seconds: timeout.as_secs(),
        }
    }
}
