//! Core types for the model-backend abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use codeforge_utils::error::{OracleError, SearchError};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Plain UTF-8 content.
    pub content: String,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the requested tool.
    pub name: String,
    /// JSON-encoded arguments, verbatim from the provider.
    pub arguments: String,
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens generated.
    pub output_tokens: u64,
}

/// Response from one model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Raw response text.
    pub content: String,
    /// Tool calls requested by the model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Provider-reported finish reason (e.g. `"stop"`, `"length"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Token usage, if the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ModelResponse {
    /// Create a text-only response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: None,
            finish_reason: None,
            usage: None,
        }
    }

    /// Set the finish reason.
    #[must_use]
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Set token usage.
    #[must_use]
    pub fn with_usage(mut self, input: u64, output: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens: input,
            output_tokens: output,
        });
        self
    }
}

/// Trait for language-model backends.
///
/// All providers implement this trait, allowing the phase layer to work
/// with any provider without knowing transport details. Timeouts and
/// retries are a provider concern; the engine treats a returned error as
/// a failed call and degrades according to its own policy.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Invoke the model with an ordered message sequence.
    ///
    /// # Errors
    ///
    /// Returns `OracleError` for transport failures, provider timeouts,
    /// or empty responses.
    async fn invoke(&self, messages: &[Message]) -> Result<ModelResponse, OracleError>;
}

/// One result from a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
    /// Short excerpt of the matching content.
    pub snippet: String,
}

impl SearchHit {
    /// Render the hit as a text block suitable for summarization prompts.
    #[must_use]
    pub fn render(&self) -> String {
        format!("- {}\n  {}\n  {}", self.title, self.snippet, self.url)
    }
}

/// Trait for web/academic search providers.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Execute one query and return ordered results.
    ///
    /// # Errors
    ///
    /// Returns `SearchError` when the provider call fails; the engine
    /// converts such failures into textual markers rather than aborting.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn model_response_builder() {
        let resp = ModelResponse::text("hello")
            .with_finish_reason("stop")
            .with_usage(10, 5);
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().output_tokens, 5);
    }

    #[test]
    fn search_hit_render_contains_all_fields() {
        let hit = SearchHit {
            title: "Docs".into(),
            url: "https://example.com".into(),
            snippet: "An excerpt".into(),
        };
        let text = hit.render();
        assert!(text.contains("Docs"));
        assert!(text.contains("An excerpt"));
        assert!(text.contains("https://example.com"));
    }
}
