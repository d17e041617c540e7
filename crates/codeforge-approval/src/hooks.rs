//! Hook-pipeline integration for the approval gate.
//!
//! Three gated operation classes, each with its own hook: code execution
//! and dangerous system operations attach to `BeforeToolCall`, plan
//! acceptance to `BeforeAgent`. Every hook consults its `auto_approve`
//! flag before engaging the full gate so automated runs never block, and
//! reports its outcome exclusively through context metadata.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use codeforge_hooks::{Hook, HookContext, HookEvent, HookRegistry};
use codeforge_utils::error::HookError;

use crate::request::{ApprovalStatus, OperationClass};
use crate::service::ApprovalService;

/// Tool names that count as code execution.
pub const EXECUTION_TOOLS: &[&str] = &["execute_code", "execute_tests"];

/// Fixed allow-list of system operations that require consent.
pub const DANGEROUS_OPERATIONS: &[&str] = &[
    "install_package",
    "file_delete",
    "file_move",
    "shell_execute",
    "network_request",
];

/// Auto-approval switches for non-interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalPolicy {
    /// Skip the gate for code execution.
    pub auto_approve_code: bool,
    /// Skip the gate for plan acceptance.
    pub auto_approve_plan: bool,
    /// Skip the gate for dangerous system operations.
    pub auto_approve_system: bool,
}

impl ApprovalPolicy {
    /// Policy that approves everything; for fully automated runs.
    #[must_use]
    pub const fn permissive() -> Self {
        Self {
            auto_approve_code: true,
            auto_approve_plan: true,
            auto_approve_system: true,
        }
    }
}

fn context_snapshot<T>(ctx: &HookContext<T>, keys: &[&str]) -> BTreeMap<String, String> {
    let mut snapshot = BTreeMap::new();
    for key in keys {
        if let Some(value) = ctx.get_metadata(key) {
            let rendered = value
                .as_str()
                .map_or_else(|| value.to_string(), ToString::to_string);
            snapshot.insert((*key).to_string(), rendered);
        }
    }
    snapshot
}

/// Gate for running generated code in the sandbox.
pub struct CodeExecutionApprovalHook {
    service: Arc<ApprovalService>,
    auto_approve: bool,
}

impl CodeExecutionApprovalHook {
    /// Default pipeline priority for this hook.
    pub const PRIORITY: i32 = 100;

    /// Create the hook around a service instance.
    #[must_use]
    pub fn new(service: Arc<ApprovalService>, auto_approve: bool) -> Self {
        Self {
            service,
            auto_approve,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Hook<T> for CodeExecutionApprovalHook {
    async fn call(&self, mut ctx: HookContext<T>) -> Result<HookContext<T>, HookError> {
        let Some(tool_name) = ctx.metadata_str("tool_name").map(ToString::to_string) else {
            return Ok(ctx);
        };
        if !EXECUTION_TOOLS.contains(&tool_name.as_str()) {
            return Ok(ctx);
        }

        if self.auto_approve {
            ctx.set_metadata("execution_approved", json!(true));
            return Ok(ctx);
        }

        let code_len = ctx
            .metadata_str("code_preview")
            .map_or(0, |preview| preview.len());
        let request = self.service.create_request(
            OperationClass::CodeExecution,
            format!("execute generated code via {tool_name} ({code_len} preview chars)"),
            context_snapshot(&ctx, &["tool_name", "code_preview", "phase"]),
            None,
        );

        let resolved = self
            .service
            .wait_for_approval(request.id)
            .await
            .map_err(|e| HookError::failed(e.to_string()))?;

        if resolved.status == ApprovalStatus::Approved {
            ctx.set_metadata("execution_approved", json!(true));
        } else {
            ctx.set_metadata("execution_approved", json!(false));
            ctx.set_metadata(
                "rejection_reason",
                json!(resolved
                    .response
                    .unwrap_or_else(|| format!("execution {}", resolved.status))),
            );
        }
        Ok(ctx)
    }
}

/// Gate for accepting a generated plan before coding proceeds.
pub struct PlanApprovalHook {
    service: Arc<ApprovalService>,
    auto_approve: bool,
}

impl PlanApprovalHook {
    /// Default pipeline priority for this hook.
    pub const PRIORITY: i32 = 90;

    /// Create the hook around a service instance.
    #[must_use]
    pub fn new(service: Arc<ApprovalService>, auto_approve: bool) -> Self {
        Self {
            service,
            auto_approve,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Hook<T> for PlanApprovalHook {
    async fn call(&self, mut ctx: HookContext<T>) -> Result<HookContext<T>, HookError> {
        // Only fires when the caller staged a plan for acceptance.
        let Some(plan) = ctx.metadata_str("plan_preview").map(ToString::to_string) else {
            return Ok(ctx);
        };

        if self.auto_approve {
            ctx.set_metadata("plan_approved", json!(true));
            return Ok(ctx);
        }

        let request = self.service.create_request(
            OperationClass::PlanAcceptance,
            format!("accept execution plan ({} chars)", plan.len()),
            context_snapshot(&ctx, &["plan_preview", "phase"]),
            None,
        );

        let resolved = self
            .service
            .wait_for_approval(request.id)
            .await
            .map_err(|e| HookError::failed(e.to_string()))?;

        if resolved.status == ApprovalStatus::Approved {
            ctx.set_metadata("plan_approved", json!(true));
        } else {
            ctx.set_metadata("plan_approved", json!(false));
            ctx.set_metadata(
                "rejection_reason",
                json!(resolved
                    .response
                    .unwrap_or_else(|| format!("plan {}", resolved.status))),
            );
        }
        Ok(ctx)
    }
}

/// Gate for the fixed allow-list of dangerous system operations.
pub struct SystemOperationApprovalHook {
    service: Arc<ApprovalService>,
    auto_approve: bool,
}

impl SystemOperationApprovalHook {
    /// Default pipeline priority for this hook.
    pub const PRIORITY: i32 = 110;

    /// Create the hook around a service instance.
    #[must_use]
    pub fn new(service: Arc<ApprovalService>, auto_approve: bool) -> Self {
        Self {
            service,
            auto_approve,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Hook<T> for SystemOperationApprovalHook {
    async fn call(&self, mut ctx: HookContext<T>) -> Result<HookContext<T>, HookError> {
        let Some(tool_name) = ctx.metadata_str("tool_name").map(ToString::to_string) else {
            return Ok(ctx);
        };
        if !DANGEROUS_OPERATIONS.contains(&tool_name.as_str()) {
            return Ok(ctx);
        }

        if self.auto_approve {
            ctx.set_metadata("operation_approved", json!(true));
            return Ok(ctx);
        }

        let request = self.service.create_request(
            OperationClass::SystemOperation,
            format!("system operation: {tool_name}"),
            context_snapshot(&ctx, &["tool_name", "parameters", "phase"]),
            None,
        );

        let resolved = self
            .service
            .wait_for_approval(request.id)
            .await
            .map_err(|e| HookError::failed(e.to_string()))?;

        if resolved.status == ApprovalStatus::Approved {
            ctx.set_metadata("operation_approved", json!(true));
        } else {
            ctx.set_metadata("operation_approved", json!(false));
            ctx.set_metadata(
                "rejection_reason",
                json!(resolved
                    .response
                    .unwrap_or_else(|| format!("operation {}", resolved.status))),
            );
        }
        Ok(ctx)
    }
}

/// Register all three approval hooks on a registry.
pub fn register_approval_hooks<T: Send + Sync + Clone + 'static>(
    registry: &mut HookRegistry<T>,
    service: &Arc<ApprovalService>,
    policy: ApprovalPolicy,
) {
    registry.register(
        HookEvent::BeforeToolCall,
        CodeExecutionApprovalHook::PRIORITY,
        Arc::new(CodeExecutionApprovalHook::new(
            Arc::clone(service),
            policy.auto_approve_code,
        )),
    );
    registry.register(
        HookEvent::BeforeAgent,
        PlanApprovalHook::PRIORITY,
        Arc::new(PlanApprovalHook::new(
            Arc::clone(service),
            policy.auto_approve_plan,
        )),
    );
    registry.register(
        HookEvent::BeforeToolCall,
        SystemOperationApprovalHook::PRIORITY,
        Arc::new(SystemOperationApprovalHook::new(
            Arc::clone(service),
            policy.auto_approve_system,
        )),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tool_ctx(tool: &str) -> HookContext<()> {
        HookContext::new(HookEvent::BeforeToolCall, ())
            .with_metadata("tool_name", json!(tool))
            .with_metadata("code_preview", json!("print('hi')"))
    }

    #[tokio::test]
    async fn auto_approve_skips_the_gate() {
        let service = Arc::new(ApprovalService::default());
        let hook = CodeExecutionApprovalHook::new(Arc::clone(&service), true);
        let ctx = hook.call(tool_ctx("execute_code")).await.unwrap();
        assert!(ctx.metadata_flag("execution_approved", false));
        assert!(service.history().is_empty());
    }

    #[tokio::test]
    async fn unrelated_tools_pass_through() {
        let service = Arc::new(ApprovalService::default());
        let hook = CodeExecutionApprovalHook::new(service, false);
        let ctx = hook.call(tool_ctx("search")).await.unwrap();
        assert!(ctx.get_metadata("execution_approved").is_none());
    }

    #[tokio::test]
    async fn rejection_reason_lands_in_metadata() {
        let service = Arc::new(ApprovalService::default());
        let hook = CodeExecutionApprovalHook::new(Arc::clone(&service), false);

        let resolver = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                loop {
                    if let Some(id) = service.pending_ids().first().copied() {
                        service.reject(id, Some("not today".into())).unwrap();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let ctx = hook.call(tool_ctx("execute_code")).await.unwrap();
        resolver.await.unwrap();

        assert!(!ctx.metadata_flag("execution_approved", true));
        assert_eq!(ctx.metadata_str("rejection_reason"), Some("not today"));
    }

    #[tokio::test]
    async fn plan_hook_only_fires_with_staged_plan() {
        let service = Arc::new(ApprovalService::default());
        let hook = PlanApprovalHook::new(service, true);

        let plain = HookContext::new(HookEvent::BeforeAgent, ());
        let ctx = hook.call(plain).await.unwrap();
        assert!(ctx.get_metadata("plan_approved").is_none());

        let staged = HookContext::new(HookEvent::BeforeAgent, ())
            .with_metadata("plan_preview", json!("1. write code"));
        let ctx = hook.call(staged).await.unwrap();
        assert!(ctx.metadata_flag("plan_approved", false));
    }

    #[tokio::test]
    async fn dangerous_operations_are_gated() {
        let service = Arc::new(ApprovalService::default());
        let hook = SystemOperationApprovalHook::new(Arc::clone(&service), true);

        for op in DANGEROUS_OPERATIONS {
            let ctx = hook.call(tool_ctx(op)).await.unwrap();
            assert!(ctx.metadata_flag("operation_approved", false), "{op}");
        }

        // Tools outside the allow-list are untouched.
        let ctx = hook.call(tool_ctx("read_file")).await.unwrap();
        assert!(ctx.get_metadata("operation_approved").is_none());
    }

    #[tokio::test]
    async fn registration_orders_by_priority() {
        let service = Arc::new(ApprovalService::default());
        let mut registry: HookRegistry<()> = HookRegistry::new();
        register_approval_hooks(&mut registry, &service, ApprovalPolicy::permissive());
        assert_eq!(registry.len_for(HookEvent::BeforeToolCall), 2);
        assert_eq!(registry.len_for(HookEvent::BeforeAgent), 1);

        // System-operation hook (110) outranks code-execution (100): an
        // allow-listed tool is stamped by the system gate first.
        let ctx = registry
            .trigger(HookEvent::BeforeToolCall, tool_ctx("install_package"))
            .await;
        assert!(ctx.metadata_flag("operation_approved", false));
    }
}
