use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event points in the agent lifecycle where hooks can attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    /// Before a phase executes.
    BeforeAgent,
    /// After a phase executes.
    AfterAgent,
    /// Before a model invocation.
    BeforeModel,
    /// After a model invocation.
    AfterModel,
    /// Wrapping a model invocation.
    WrapModelCall,
    /// Before an external tool call (search, code execution, ...).
    BeforeToolCall,
    /// After an external tool call.
    AfterToolCall,
    /// Wrapping an external tool call.
    WrapToolCall,
    /// Before asking the user for clarification.
    BeforeClarification,
    /// After a clarification round completes.
    AfterClarification,
    /// While blocked on clarification input.
    WaitForClarification,
}

impl HookEvent {
    /// Canonical snake_case name of the event.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeAgent => "before_agent",
            Self::AfterAgent => "after_agent",
            Self::BeforeModel => "before_model",
            Self::AfterModel => "after_model",
            Self::WrapModelCall => "wrap_model_call",
            Self::BeforeToolCall => "before_tool_call",
            Self::AfterToolCall => "after_tool_call",
            Self::WrapToolCall => "wrap_tool_call",
            Self::BeforeClarification => "before_clarification",
            Self::AfterClarification => "after_clarification",
            Self::WaitForClarification => "wait_for_clarification",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient envelope threaded through a hook chain.
///
/// `data` is the phase-specific payload (often the workflow state
/// itself); handlers may replace it wholesale but must never change its
/// type. `metadata` is the side-channel map handlers read and write to
/// pass decisions back to the caller, which inspects it after the chain
/// completes. A context is created fresh per triggered event and
/// discarded after the chain; its final `data` is what downstream logic
/// uses.
#[derive(Debug, Clone)]
pub struct HookContext<T> {
    /// Primary payload for this event.
    pub data: T,
    /// Side-channel decisions and annotations.
    pub metadata: HashMap<String, Value>,
    /// The event this context was created for.
    pub event: HookEvent,
}

impl<T> HookContext<T> {
    /// Create a context for an event.
    #[must_use]
    pub fn new(event: HookEvent, data: T) -> Self {
        Self {
            data,
            metadata: HashMap::new(),
            event,
        }
    }

    /// Attach a metadata entry at construction time.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Read a metadata entry.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Read a boolean metadata flag, with a default for absent keys.
    ///
    /// Callers must defensively check presence; the map has no schema.
    #[must_use]
    pub fn metadata_flag(&self, key: &str, default: bool) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Read a string metadata entry.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}
