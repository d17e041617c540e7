//! Collaborator interfaces for the language-model oracle and the search
//! provider.
//!
//! The workflow engine treats both as opaque request/response services:
//! phases build message sequences, the backend returns text, and all
//! prompt content is owned by the caller. Concrete provider adapters
//! (HTTP APIs, CLIs) live outside this workspace and implement these
//! traits.

mod types;

pub use types::{
    Message, ModelBackend, ModelResponse, Role, SearchHit, SearchProvider, ToolCall, Usage,
};

// Deterministic in-memory implementations for tests and dry runs.
// Test seam; not part of public API stability guarantees.
#[doc(hidden)]
pub mod testing;
