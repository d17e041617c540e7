//! Human-in-the-loop approval gate.
//!
//! Risky operations (code execution, plan acceptance, dangerous system
//! operations) pause the workflow until an operator approves, rejects, or
//! the request times out. The service is an explicit instance injected
//! into whichever hook needs it, scoped to one workflow run or one
//! process; there is no global manager.
//!
//! Waiting is notification-based: the operator-input handler signals a
//! `tokio::sync::Notify` that the waiter is parked on, bounded by the
//! request deadline. Denial and timeout are first-class outcomes the
//! calling phase branches on, not errors.

mod hooks;
mod request;
mod service;

pub use hooks::{
    ApprovalPolicy, CodeExecutionApprovalHook, DANGEROUS_OPERATIONS, EXECUTION_TOOLS,
    PlanApprovalHook, SystemOperationApprovalHook, register_approval_hooks,
};
pub use request::{ApprovalRequest, ApprovalStatus, OperationClass};
pub use service::{ApprovalService, ConsoleChannel, OperatorChannel, OperatorDecision};
