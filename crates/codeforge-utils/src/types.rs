use serde::{Deserialize, Serialize};

/// Phase identifiers for the agent workflow.
///
/// `PhaseType` represents the stages of the fixed coding pipeline. A run
/// always starts in `Planning` and terminates in `Finished`; every other
/// transition is decided by the orchestrator from the signal the previous
/// phase recorded.
///
/// # Phase Order
///
/// ```text
/// Planning → Searching → Coding → Executing → Reflecting → Finished
///     ↑          │                                 │
///     └──────────┴───────── (oracle-directed) ─────┘
/// ```
///
/// # Serialization
///
/// `PhaseType` serializes to its lowercase string form (e.g. `"planning"`),
/// which is also what appears in logs and hook metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseType {
    /// Analyze the user request and decide between searching and coding.
    Planning,
    /// Gather missing information through the search provider.
    Searching,
    /// Generate or refine code files from the plan and search context.
    Coding,
    /// Run the generated code in the sandbox.
    Executing,
    /// Classify the execution outcome and pick the next phase.
    Reflecting,
    /// Terminal state: the task is complete.
    Finished,
}

impl PhaseType {
    /// Returns the canonical lowercase name of the phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Searching => "searching",
            Self::Coding => "coding",
            Self::Executing => "executing",
            Self::Reflecting => "reflecting",
            Self::Finished => "finished",
        }
    }

    /// Whether this phase ends the workflow.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_type_str_roundtrip() {
        for phase in [
            PhaseType::Planning,
            PhaseType::Searching,
            PhaseType::Coding,
            PhaseType::Executing,
            PhaseType::Reflecting,
            PhaseType::Finished,
        ] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
            let back: PhaseType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, phase);
        }
    }

    #[test]
    fn only_finished_is_terminal() {
        assert!(PhaseType::Finished.is_terminal());
        assert!(!PhaseType::Planning.is_terminal());
        assert!(!PhaseType::Reflecting.is_terminal());
    }
}
