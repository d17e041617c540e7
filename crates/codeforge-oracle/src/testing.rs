//! Deterministic in-memory collaborators for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use codeforge_utils::error::{OracleError, SearchError};

use crate::types::{Message, ModelBackend, ModelResponse, SearchHit, SearchProvider};

/// Model backend that replays a fixed script of responses.
///
/// Each `invoke` pops the next scripted response; when the script runs
/// dry the backend returns `OracleError::EmptyResponse`, which makes an
/// under-scripted test fail loudly instead of hanging a workflow.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Create a backend from an ordered response script.
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `invoke` calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn invoke(&self, _messages: &[Message]) -> Result<ModelResponse, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .expect("scripted response lock poisoned")
            .pop_front();
        match next {
            Some(content) => Ok(ModelResponse::text(content).with_finish_reason("stop")),
            None => Err(OracleError::EmptyResponse),
        }
    }
}

/// Search provider that returns the same fixed hits for every query.
pub struct StaticSearchProvider {
    hits: Vec<SearchHit>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearchProvider {
    /// Create a provider that answers every query with `hits`.
    #[must_use]
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries observed so far, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("query log lock poisoned").clone()
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.queries
            .lock()
            .expect("query log lock poisoned")
            .push(query.to_string());
        Ok(self.hits.clone())
    }
}

/// Search provider that fails every query, for error-path tests.
pub struct FailingSearchProvider;

#[async_trait]
impl SearchProvider for FailingSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Err(SearchError::Provider {
            reason: format!("no provider configured for query '{query}'"),
        })
    }
}
