//! Cross-cutting hook pipeline.
//!
//! Every phase transition and every external tool invocation in the
//! workflow is wrapped by an ordered, event-typed interceptor chain.
//! Handlers observe or gate the surrounding operation; the context's
//! `metadata` map is the only sanctioned channel for a handler to
//! influence control flow, and handler failures are isolated so a single
//! misbehaving observability hook cannot halt the workflow.

mod context;
mod registry;

pub use context::{HookContext, HookEvent};
pub use registry::{FnHook, Hook, HookRegistry};
