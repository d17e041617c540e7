use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an approval request.
///
/// Monotonic: `Pending` transitions to exactly one terminal state and
/// never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting operator input.
    Pending,
    /// Operator consented.
    Approved,
    /// Operator denied, or input was unrecognized.
    Rejected,
    /// The deadline elapsed without input.
    TimedOut,
}

impl ApprovalStatus {
    /// Canonical lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TimedOut => "timedout",
        }
    }

    /// Whether this status is final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of operation gated by the approval system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Running generated code in the sandbox.
    CodeExecution,
    /// Accepting a generated plan before coding proceeds.
    PlanAcceptance,
    /// A dangerous system operation from the fixed allow-list.
    SystemOperation,
}

impl OperationClass {
    /// Canonical snake_case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CodeExecution => "code_execution",
            Self::PlanAcceptance => "plan_acceptance",
            Self::SystemOperation => "system_operation",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request for operator consent.
///
/// Mutable until it reaches a terminal status, then moved into the
/// immutable history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request id.
    pub id: Uuid,
    /// Which gated class this request belongs to.
    pub operation: OperationClass,
    /// Human-readable description shown to the operator.
    pub description: String,
    /// Snapshot of relevant context (previews, tool names).
    pub context: BTreeMap<String, String>,
    /// When the request was created.
    pub requested_at: DateTime<Utc>,
    /// How long to wait before forcing `TimedOut`.
    pub timeout: Duration,
    /// Current lifecycle state.
    pub status: ApprovalStatus,
    /// Free-text operator rationale, if any.
    pub response: Option<String>,
    /// When a terminal status was reached.
    pub responded_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub(crate) fn new(
        operation: OperationClass,
        description: impl Into<String>,
        context: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            description: description.into(),
            context,
            requested_at: Utc::now(),
            timeout,
            status: ApprovalStatus::Pending,
            response: None,
            responded_at: None,
        }
    }

    /// The instant after which the request is considered expired.
    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        self.requested_at + self.timeout
    }

    /// Whether the deadline has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.deadline()
    }

    /// Move to a terminal status. No-op if already terminal.
    pub(crate) fn resolve(&mut self, status: ApprovalStatus, response: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.response = response;
        self.responded_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timeout: Duration) -> ApprovalRequest {
        ApprovalRequest::new(
            OperationClass::CodeExecution,
            "run generated code",
            BTreeMap::new(),
            timeout,
        )
    }

    #[test]
    fn new_request_is_pending() {
        let req = request(Duration::from_secs(300));
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert!(req.response.is_none());
        assert!(req.responded_at.is_none());
        assert!(!req.is_expired());
    }

    #[test]
    fn resolve_is_monotonic() {
        let mut req = request(Duration::from_secs(300));
        req.resolve(ApprovalStatus::Rejected, Some("too risky".into()));
        assert_eq!(req.status, ApprovalStatus::Rejected);

        // A second resolution attempt is a no-op.
        req.resolve(ApprovalStatus::Approved, Some("changed my mind".into()));
        assert_eq!(req.status, ApprovalStatus::Rejected);
        assert_eq!(req.response.as_deref(), Some("too risky"));
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let req = request(Duration::ZERO);
        assert!(req.is_expired());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::TimedOut.is_terminal());
    }
}
