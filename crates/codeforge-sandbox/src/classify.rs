//! Post-hoc failure classification.
//!
//! The categories are a heuristic oracle input consumed by the reflection
//! phase, not an authoritative diagnosis: the sandbox itself never acts
//! on them.

use serde::{Deserialize, Serialize};

use crate::sandbox::ExecutionResult;

/// Advisory category for a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Syntax or indentation errors.
    Syntax,
    /// Missing imports or modules.
    Import,
    /// Attribute/method misuse, usually an API misunderstanding.
    ApiMisuse,
    /// Undefined names.
    Name,
    /// Everything else that failed at runtime.
    Runtime,
}

impl FailureKind {
    /// Canonical lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Import => "import",
            Self::ApiMisuse => "api_misuse",
            Self::Name => "name",
            Self::Runtime => "runtime",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a failed execution result.
///
/// Returns `None` for successful results. Timeouts classify as `Runtime`.
#[must_use]
pub fn classify_failure(result: &ExecutionResult) -> Option<FailureKind> {
    if result.success() {
        return None;
    }
    Some(classify_stderr(&result.stderr))
}

/// Classify error text by keyword scan, defaulting to `Runtime`.
#[must_use]
pub fn classify_stderr(stderr: &str) -> FailureKind {
    let text = stderr.to_lowercase();

    let any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if any(&["syntaxerror", "indentationerror", "syntax error"]) {
        FailureKind::Syntax
    } else if any(&["importerror", "modulenotfounderror", "no module named"]) {
        FailureKind::Import
    } else if any(&["attributeerror", "method not found", "object has no attribute"]) {
        FailureKind::ApiMisuse
    } else if any(&["nameerror", "not defined", "undefined"]) {
        FailureKind::Name
    } else {
        FailureKind::Runtime
    }
}
