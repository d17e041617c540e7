use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use codeforge_hooks::{HookContext, HookEvent};
use codeforge_oracle::{Message, ModelBackend, SearchProvider};
use codeforge_utils::CodeforgeError;
use codeforge_utils::types::PhaseType;

use crate::decision::DecisionParser;
use crate::phase::Phase;
use crate::phases::{invoke_oracle, search_summary, truncate};
use crate::state::{HookPayload, PhaseSignal, WorkflowHooks, WorkflowState};

/// Hard cap on queries per search round, bounding cost and context growth.
pub const MAX_QUERIES_PER_ROUND: usize = 3;

/// Hits rendered per query before summarization.
const MAX_HITS_PER_QUERY: usize = 5;

/// Cap on raw result text stored per query.
const MAX_RESULT_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You are the research stage of an autonomous coding agent. \
Generate focused search queries and concise summaries of findings.";

const SUFFICIENCY_KEYWORDS: &[&str] =
    &["sufficient", "complete", "enough information", "no further search"];

/// Searching phase: issue bounded queries, summarize results, and ask the
/// oracle whether the gathered information suffices.
pub struct SearchingPhase {
    oracle: Arc<dyn ModelBackend>,
    search: Arc<dyn SearchProvider>,
    hooks: Arc<WorkflowHooks>,
    parser: Arc<dyn DecisionParser>,
}

impl SearchingPhase {
    /// Create the phase around its collaborators.
    #[must_use]
    pub fn new(
        oracle: Arc<dyn ModelBackend>,
        search: Arc<dyn SearchProvider>,
        hooks: Arc<WorkflowHooks>,
        parser: Arc<dyn DecisionParser>,
    ) -> Self {
        Self {
            oracle,
            search,
            hooks,
            parser,
        }
    }

    async fn generate_queries(&self, state: &WorkflowState) -> Result<Vec<String>, CodeforgeError> {
        let missing = state
            .get_metadata("missing_info")
            .cloned()
            .unwrap_or_else(|| json!(["more background on the task"]));
        let previous: Vec<&str> = state
            .search_context
            .iter()
            .map(|r| r.query.as_str())
            .collect();
        let user = format!(
            "Goal: {}\nMissing information: {missing}\nPrevious queries: {previous:?}\n\
             Respond with JSON: {{\"queries\": [...]}}.",
            state.user_goal
        );
        let response = invoke_oracle(
            &self.hooks,
            self.oracle.as_ref(),
            "searching",
            vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
        )
        .await?;
        Ok(self.parser.parse_queries(&response))
    }

    /// Run one query through the provider with tool-call hooks around it.
    /// Provider failures become a textual marker that flows into the next
    /// oracle prompt instead of aborting the workflow.
    async fn perform_search(&self, query: &str) -> String {
        let before = HookContext::new(
            HookEvent::BeforeToolCall,
            HookPayload::Tool(json!({ "query": query })),
        )
        .with_metadata("tool_name", json!("search"))
        .with_metadata("phase", json!("searching"));
        self.hooks.trigger(HookEvent::BeforeToolCall, before).await;

        let rendered = match self.search.search(query).await {
            Ok(hits) => {
                let blocks: Vec<String> = hits
                    .iter()
                    .take(MAX_HITS_PER_QUERY)
                    .map(codeforge_oracle::SearchHit::render)
                    .collect();
                truncate(&blocks.join("\n"), MAX_RESULT_CHARS)
            }
            Err(e) => {
                warn!(query, error = %e, "search failed");
                format!("search failed: {e}")
            }
        };

        let after = HookContext::new(
            HookEvent::AfterToolCall,
            HookPayload::Tool(json!({ "query": query, "result_len": rendered.len() })),
        )
        .with_metadata("tool_name", json!("search"))
        .with_metadata("phase", json!("searching"));
        self.hooks.trigger(HookEvent::AfterToolCall, after).await;

        rendered
    }

    async fn summarize(&self, query: &str, result: &str) -> Result<String, CodeforgeError> {
        let user = format!("Summarize the key information in this search result.\n\nQuery: {query}\n\nResult:\n{result}");
        let summary = invoke_oracle(
            &self.hooks,
            self.oracle.as_ref(),
            "searching",
            vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
        )
        .await?;
        Ok(summary)
    }

    async fn check_sufficiency(&self, state: &WorkflowState) -> Result<bool, CodeforgeError> {
        let user = format!(
            "Goal: {}\n\nFindings so far:\n{}\n\nIs this information sufficient to start coding? \
             Answer briefly.",
            state.user_goal,
            search_summary(state)
        );
        let response = invoke_oracle(
            &self.hooks,
            self.oracle.as_ref(),
            "searching",
            vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
        )
        .await?;
        let lower = response.to_lowercase();
        Ok(SUFFICIENCY_KEYWORDS.iter().any(|k| lower.contains(k)))
    }
}

#[async_trait]
impl Phase for SearchingPhase {
    fn phase_type(&self) -> PhaseType {
        PhaseType::Searching
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<(), CodeforgeError> {
        let staged: Vec<String> = state
            .take_metadata("search_queries")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let queries = if staged.is_empty() {
            self.generate_queries(state).await?
        } else {
            staged
        };

        for query in queries.iter().take(MAX_QUERIES_PER_ROUND) {
            info!(query, "searching");
            let result = self.perform_search(query).await;
            let summary = self.summarize(query, &result).await?;
            state.add_search_result(query.clone(), result, Some(summary));
        }

        let sufficient = self.check_sufficiency(state).await?;
        info!(sufficient, "search round complete");
        state.set_signal(PhaseSignal::Searched { sufficient });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::TwoTierParser;
    use codeforge_oracle::SearchHit;
    use codeforge_oracle::testing::{FailingSearchProvider, ScriptedBackend, StaticSearchProvider};

    fn hit() -> SearchHit {
        SearchHit {
            title: "Tokio docs".into(),
            url: "https://tokio.rs".into(),
            snippet: "async runtime".into(),
        }
    }

    #[tokio::test]
    async fn staged_queries_are_used_and_capped_at_three() {
        let provider = Arc::new(StaticSearchProvider::new(vec![hit()]));
        // 3 summaries + 1 sufficiency check.
        let phase = SearchingPhase::new(
            Arc::new(ScriptedBackend::new(["s1", "s2", "s3", "that is sufficient"])),
            Arc::clone(&provider) as Arc<dyn SearchProvider>,
            Arc::new(WorkflowHooks::new()),
            Arc::new(TwoTierParser),
        );

        let mut state = WorkflowState::new("goal");
        state.update_phase(PhaseType::Searching);
        state.set_metadata("search_queries", json!(["a", "b", "c", "d", "e"]));

        phase.execute(&mut state).await.unwrap();

        // Never more than 3 queries per round, however many were staged.
        assert_eq!(provider.queries().len(), 3);
        assert_eq!(state.search_context.len(), 3);
        assert_eq!(
            state.take_signal(),
            Some(PhaseSignal::Searched { sufficient: true })
        );
        // Staged queries were consumed.
        assert!(state.get_metadata("search_queries").is_none());
    }

    #[tokio::test]
    async fn queries_are_generated_when_none_staged() {
        let provider = Arc::new(StaticSearchProvider::new(vec![hit()]));
        let phase = SearchingPhase::new(
            Arc::new(ScriptedBackend::new([
                r#"{"queries": ["generated query"]}"#,
                "summary",
                "not enough yet",
            ])),
            Arc::clone(&provider) as Arc<dyn SearchProvider>,
            Arc::new(WorkflowHooks::new()),
            Arc::new(TwoTierParser),
        );

        let mut state = WorkflowState::new("goal");
        state.update_phase(PhaseType::Searching);
        phase.execute(&mut state).await.unwrap();

        assert_eq!(provider.queries(), vec!["generated query"]);
        assert_eq!(
            state.take_signal(),
            Some(PhaseSignal::Searched { sufficient: false })
        );
        let record = &state.search_context[0];
        assert!(record.result.contains("Tokio docs"));
        assert_eq!(record.summary.as_deref(), Some("summary"));
    }

    #[tokio::test]
    async fn provider_failure_becomes_textual_marker() {
        let phase = SearchingPhase::new(
            Arc::new(ScriptedBackend::new(["summary", "sufficient"])),
            Arc::new(FailingSearchProvider),
            Arc::new(WorkflowHooks::new()),
            Arc::new(TwoTierParser),
        );
        let mut state = WorkflowState::new("goal");
        state.update_phase(PhaseType::Searching);
        state.set_metadata("search_queries", json!(["doomed"]));

        phase.execute(&mut state).await.unwrap();
        assert!(state.search_context[0].result.starts_with("search failed:"));
    }
}
