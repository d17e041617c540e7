use async_trait::async_trait;

use codeforge_utils::CodeforgeError;
use codeforge_utils::types::PhaseType;

use crate::state::WorkflowState;

/// One stage of the workflow pipeline.
///
/// A phase never updates `current_phase` itself: it does its work against
/// the borrowed state, records a [`PhaseSignal`](crate::PhaseSignal), and
/// leaves the transition to the orchestrator. Entry is guarded by
/// `can_enter`; a violation is a programming/ordering bug surfaced as
/// [`PhaseError::GuardViolation`](codeforge_utils::error::PhaseError).
#[async_trait]
pub trait Phase: Send + Sync {
    /// The phase this implementation handles.
    fn phase_type(&self) -> PhaseType;

    /// Whether the workflow may enter this phase in its current state.
    fn can_enter(&self, state: &WorkflowState) -> bool {
        state.current_phase == self.phase_type()
    }

    /// Perform the phase's work, mutating the state in place.
    ///
    /// # Errors
    ///
    /// Propagates oracle transport failures and phase-level failures; the
    /// orchestrator surfaces these without advancing the phase.
    async fn execute(&self, state: &mut WorkflowState) -> Result<(), CodeforgeError>;
}
