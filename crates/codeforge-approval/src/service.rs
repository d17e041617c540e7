use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

use codeforge_utils::error::ApprovalError;

use crate::request::{ApprovalRequest, ApprovalStatus, OperationClass};

/// Default request timeout: five minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Operator tokens recognized as consent.
const YES_TOKENS: &[&str] = &["y", "yes", "approve", "approved", "ok"];

/// Operator tokens recognized as denial.
const NO_TOKENS: &[&str] = &["n", "no", "reject", "rejected", "deny"];

/// Parsed operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorDecision {
    /// Consent, with optional rationale.
    Approve(Option<String>),
    /// Denial, with optional rationale.
    Reject(Option<String>),
}

impl OperatorDecision {
    /// Map raw operator input to a decision.
    ///
    /// The first whitespace-separated token is matched against a small
    /// yes/no vocabulary; any trailing text becomes the rationale.
    /// Unrecognized input is treated as a rejection with the full input
    /// as the reason string.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or("").to_lowercase();
        let rest = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);

        if YES_TOKENS.contains(&head.as_str()) {
            Self::Approve(rest)
        } else if NO_TOKENS.contains(&head.as_str()) {
            Self::Reject(rest)
        } else if trimmed.is_empty() {
            Self::Reject(None)
        } else {
            Self::Reject(Some(trimmed.to_string()))
        }
    }
}

/// Channel on which pending requests are presented to an operator.
pub trait OperatorChannel: Send + Sync {
    /// Show one request to the operator.
    fn present(&self, request: &ApprovalRequest);
}

/// Default channel: renders the request into the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleChannel;

impl OperatorChannel for ConsoleChannel {
    fn present(&self, request: &ApprovalRequest) {
        info!(
            id = %request.id,
            operation = %request.operation,
            timeout_secs = request.timeout.as_secs(),
            "approval required: {}",
            request.description
        );
        for (key, value) in &request.context {
            info!(id = %request.id, "  {key}: {value}");
        }
        info!(id = %request.id, "reply 'y[es]' to approve, 'n[o] <reason>' to reject");
    }
}

struct PendingEntry {
    request: ApprovalRequest,
    notify: Arc<Notify>,
}

struct Inner {
    pending: HashMap<Uuid, PendingEntry>,
    history: Vec<ApprovalRequest>,
}

/// Approval service instance.
///
/// Owns the pending set and the immutable history for one scope (a
/// workflow run or a process). Inject an `Arc<ApprovalService>` into the
/// hooks that need gating; do not share one service across unrelated
/// runs.
pub struct ApprovalService {
    inner: Mutex<Inner>,
    channel: Box<dyn OperatorChannel>,
}

impl Default for ApprovalService {
    fn default() -> Self {
        Self::new(ConsoleChannel)
    }
}

impl ApprovalService {
    /// Create a service presenting requests on the given channel.
    #[must_use]
    pub fn new(channel: impl OperatorChannel + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                history: Vec::new(),
            }),
            channel: Box::new(channel),
        }
    }

    /// Create a pending request and return a snapshot of it.
    pub fn create_request(
        &self,
        operation: OperationClass,
        description: impl Into<String>,
        context: BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> ApprovalRequest {
        let request = ApprovalRequest::new(
            operation,
            description,
            context,
            timeout.unwrap_or(DEFAULT_TIMEOUT),
        );
        let snapshot = request.clone();

        let mut inner = self.inner.lock().expect("approval state lock poisoned");
        inner.pending.insert(
            request.id,
            PendingEntry {
                request,
                notify: Arc::new(Notify::new()),
            },
        );
        snapshot
    }

    /// Wait until the request reaches a terminal status.
    ///
    /// Presents the request to the operator, then parks on the request's
    /// notifier until it is resolved or the deadline passes, at which
    /// point the status is forced to `TimedOut`. On return the request
    /// has been moved into the history log.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalError::NotFound` for an unknown id.
    pub async fn wait_for_approval(&self, id: Uuid) -> Result<ApprovalRequest, ApprovalError> {
        let (notify, snapshot) = {
            let inner = self.inner.lock().expect("approval state lock poisoned");
            let entry = inner.pending.get(&id).ok_or(ApprovalError::NotFound {
                id: id.to_string(),
            })?;
            (Arc::clone(&entry.notify), entry.request.clone())
        };

        self.channel.present(&snapshot);

        enum WaitStep {
            Resolved(ApprovalRequest),
            Archived,
            Park(Duration),
        }

        loop {
            // Re-check under the lock: resolution may have raced the wait.
            let step = {
                let mut inner = self.inner.lock().expect("approval state lock poisoned");
                let park = match inner.pending.get_mut(&id) {
                    // Already archived by a concurrent waiter.
                    None => Some(WaitStep::Archived),
                    Some(entry) if entry.request.status.is_terminal() => None,
                    Some(entry) => {
                        let now = Utc::now();
                        let deadline = entry.request.deadline();
                        if now >= deadline {
                            entry.request.resolve(ApprovalStatus::TimedOut, None);
                            None
                        } else {
                            Some(WaitStep::Park(
                                (deadline - now).to_std().unwrap_or(Duration::from_millis(1)),
                            ))
                        }
                    }
                };
                // None means the entry just became terminal: archive it now.
                park.unwrap_or_else(|| WaitStep::Resolved(Self::archive(&mut inner, id)))
            };

            match step {
                WaitStep::Resolved(request) => return Ok(request),
                WaitStep::Archived => return self.from_history(id),
                WaitStep::Park(remaining) => {
                    // Park until resolved or out of time; loop re-validates.
                    let _ = tokio::time::timeout(remaining, notify.notified()).await;
                }
            }
        }
    }

    /// Resolve a request from raw operator input.
    ///
    /// Recognized yes-variants approve; no-variants reject with any
    /// trailing text as the rationale; other input rejects with the input
    /// as the reason. Resolving an already-terminal request is a no-op
    /// that reports the existing status.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalError::NotFound` for an unknown id.
    pub fn handle_operator_input(
        &self,
        id: Uuid,
        input: &str,
    ) -> Result<ApprovalStatus, ApprovalError> {
        match OperatorDecision::parse(input) {
            OperatorDecision::Approve(reason) => self.approve(id, reason),
            OperatorDecision::Reject(reason) => self.reject(id, reason),
        }
    }

    /// Approve a pending request.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalError::NotFound` for an unknown id.
    pub fn approve(
        &self,
        id: Uuid,
        rationale: Option<String>,
    ) -> Result<ApprovalStatus, ApprovalError> {
        self.resolve(id, ApprovalStatus::Approved, rationale)
    }

    /// Reject a pending request.
    ///
    /// # Errors
    ///
    /// Returns `ApprovalError::NotFound` for an unknown id.
    pub fn reject(
        &self,
        id: Uuid,
        rationale: Option<String>,
    ) -> Result<ApprovalStatus, ApprovalError> {
        self.resolve(id, ApprovalStatus::Rejected, rationale)
    }

    /// Ids of currently pending requests.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<Uuid> {
        let inner = self.inner.lock().expect("approval state lock poisoned");
        inner.pending.keys().copied().collect()
    }

    /// Snapshot of the resolved-request history.
    #[must_use]
    pub fn history(&self) -> Vec<ApprovalRequest> {
        let inner = self.inner.lock().expect("approval state lock poisoned");
        inner.history.clone()
    }

    fn resolve(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        rationale: Option<String>,
    ) -> Result<ApprovalStatus, ApprovalError> {
        let mut inner = self.inner.lock().expect("approval state lock poisoned");

        if let Some(entry) = inner.pending.get_mut(&id) {
            if entry.request.status.is_terminal() {
                return Ok(entry.request.status);
            }
            entry.request.resolve(status, rationale);
            entry.notify.notify_waiters();
            entry.notify.notify_one();
            return Ok(status);
        }

        // Already archived: report the recorded terminal status, unchanged.
        inner
            .history
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .ok_or(ApprovalError::NotFound {
                id: id.to_string(),
            })
    }

    fn archive(inner: &mut Inner, id: Uuid) -> ApprovalRequest {
        let entry = inner
            .pending
            .remove(&id)
            .expect("archive called for non-pending request");
        inner.history.push(entry.request.clone());
        entry.request
    }

    fn from_history(&self, id: Uuid) -> Result<ApprovalRequest, ApprovalError> {
        let inner = self.inner.lock().expect("approval state lock poisoned");
        inner
            .history
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(ApprovalError::NotFound {
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn service() -> Arc<ApprovalService> {
        Arc::new(ApprovalService::default())
    }

    #[test]
    fn operator_tokens_map_to_decisions() {
        assert_eq!(OperatorDecision::parse("y"), OperatorDecision::Approve(None));
        assert_eq!(
            OperatorDecision::parse("YES looks good"),
            OperatorDecision::Approve(Some("looks good".into()))
        );
        assert_eq!(OperatorDecision::parse("no"), OperatorDecision::Reject(None));
        assert_eq!(
            OperatorDecision::parse("n touches prod config"),
            OperatorDecision::Reject(Some("touches prod config".into()))
        );
        // Residual tokens become a rejection reason.
        assert_eq!(
            OperatorDecision::parse("come back tomorrow"),
            OperatorDecision::Reject(Some("come back tomorrow".into()))
        );
    }

    #[tokio::test]
    async fn approve_wakes_waiter() {
        let svc = service();
        let req = svc.create_request(
            OperationClass::CodeExecution,
            "execute 42 bytes of code",
            BTreeMap::new(),
            Some(Duration::from_secs(30)),
        );

        let waiter = {
            let svc = Arc::clone(&svc);
            let id = req.id;
            tokio::spawn(async move { svc.wait_for_approval(id).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        svc.approve(req.id, Some("reviewed".into())).unwrap();

        let resolved = waiter.await.unwrap().unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.response.as_deref(), Some("reviewed"));
        assert!(svc.pending_ids().is_empty());
        assert_eq!(svc.history().len(), 1);
    }

    #[tokio::test]
    async fn expired_request_times_out() {
        let svc = service();
        let req = svc.create_request(
            OperationClass::SystemOperation,
            "install_package",
            BTreeMap::new(),
            Some(Duration::from_millis(50)),
        );

        let resolved = svc.wait_for_approval(req.id).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::TimedOut);
        assert_eq!(svc.history().len(), 1);
    }

    #[tokio::test]
    async fn resolution_is_monotonic() {
        let svc = service();
        let req = svc.create_request(
            OperationClass::PlanAcceptance,
            "plan",
            BTreeMap::new(),
            Some(Duration::from_secs(30)),
        );

        assert_eq!(
            svc.reject(req.id, Some("first".into())).unwrap(),
            ApprovalStatus::Rejected
        );
        // Repeated resolution attempts are no-ops.
        assert_eq!(svc.approve(req.id, None).unwrap(), ApprovalStatus::Rejected);

        let resolved = svc.wait_for_approval(req.id).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Rejected);
        assert_eq!(resolved.response.as_deref(), Some("first"));

        // Still a no-op after archival.
        assert_eq!(svc.approve(req.id, None).unwrap(), ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn unknown_id_is_an_error() {
        let svc = service();
        let err = svc.wait_for_approval(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound { .. }));
        assert!(svc.approve(Uuid::new_v4(), None).is_err());
    }

    #[tokio::test]
    async fn operator_input_drives_resolution() {
        let svc = service();
        let req = svc.create_request(
            OperationClass::CodeExecution,
            "code",
            BTreeMap::new(),
            Some(Duration::from_secs(30)),
        );
        let status = svc
            .handle_operator_input(req.id, "no  it deletes files")
            .unwrap();
        assert_eq!(status, ApprovalStatus::Rejected);
        let resolved = svc.wait_for_approval(req.id).await.unwrap();
        assert_eq!(resolved.response.as_deref(), Some("it deletes files"));
    }

    proptest! {
        #[test]
        fn decision_parse_is_total(input in ".*") {
            // Arbitrary operator input always yields a decision.
            let _ = OperatorDecision::parse(&input);
        }

        #[test]
        fn unrecognized_input_rejects_with_reason(word in "[a-z]{6,12}") {
            prop_assume!(!YES_TOKENS.contains(&word.as_str()));
            prop_assume!(!NO_TOKENS.contains(&word.as_str()));
            let decision = OperatorDecision::parse(&word);
            prop_assert_eq!(decision, OperatorDecision::Reject(Some(word)));
        }
    }
}
