//! Targeted search: new fragments about one node's link to the target

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::domain::graph::{Fragment, Node, NodeType};
use crate::error::SearchError;
use crate::llm::{ChatCompleter, Prompt};

/// One search request issued while expanding a node
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub node_name: String,
    pub node_type: NodeType,
    pub target: String,
    /// Index of this search among the searches for the same node
    pub attempt: usize,
}

impl SearchQuery {
    pub fn for_node(node: &Node, target: impl Into<String>, attempt: usize) -> Self {
        Self {
            node_name: node.name.clone(),
            node_type: node.node_type,
            target: target.into(),
            attempt,
        }
    }
}

/// Produces fresh fragments for a node expansion.
///
/// Returning the same text twice is harmless: fragment ids derive from the
/// content, so the merger skips repeated observations.
#[async_trait]
pub trait TargetedSearch: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Fragment>, SearchError>;
}

const RESEARCH_ANGLES: &[&str] = &[
    "suppliers, customers and partners",
    "competitors and market position",
    "regulators, policy and legal exposure",
    "key people and upcoming events",
];

/// Asks a research-capable chat model for a brief on one node
#[derive(Clone)]
pub struct LlmResearchSearch {
    completer: Arc<dyn ChatCompleter>,
}

impl LlmResearchSearch {
    pub fn new(completer: Arc<dyn ChatCompleter>) -> Self {
        Self { completer }
    }

    fn build_research_prompt(&self, query: &SearchQuery) -> String {
        let angle = RESEARCH_ANGLES[query.attempt % RESEARCH_ANGLES.len()];
        format!(
            r#"Write a factual research brief on {name} ({node_type}) and how it affects {target}.

Focus on: {angle}.

Name every company, product, person, event and regulation involved and state how each one relates to {name} or {target}. Only include entities with a direct and significant causal influence on {target}; put the biggest drivers first."#,
            name = query.node_name,
            node_type = query.node_type,
            target = query.target,
            angle = angle,
        )
    }
}

#[async_trait]
impl TargetedSearch for LlmResearchSearch {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Fragment>, SearchError> {
        info!(node = %query.node_name, attempt = query.attempt, "Running targeted search");

        let prompt = Prompt::prose(RESEARCH_SYSTEM_PROMPT, self.build_research_prompt(query));
        let response = self
            .completer
            .complete(prompt)
            .await
            .map_err(SearchError::from)
            .inspect_err(|e| warn!(node = %query.node_name, error = %e, "Targeted search failed"))?;

        if response.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let fragment = Fragment::from_search_result(&query.node_name, response.text)
            .with_source_ref(format!("research:{}:{}", response.model, query.node_name))
            .with_observed_at(Utc::now());
        Ok(vec![fragment])
    }
}

const RESEARCH_SYSTEM_PROMPT: &str = r#"You are a research specialist building a context graph around an investment target.

Report concrete, verifiable relationships between named entities. Prefer recent information and say when something happened. Do not speculate."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::llm::Completion;
    use std::sync::Mutex;

    struct EchoCompleter {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatCompleter for EchoCompleter {
        async fn complete(&self, prompt: Prompt) -> Result<Completion> {
            self.prompts.lock().unwrap().push(prompt.user);
            if self.reply == "fail" {
                return Err(Error::LLMError("Server error (502)".into()));
            }
            Ok(Completion::scripted("research-model", self.reply.clone()))
        }
    }

    fn query(attempt: usize) -> SearchQuery {
        SearchQuery {
            node_name: "TSMC".into(),
            node_type: NodeType::Company,
            target: "Nvidia".into(),
            attempt,
        }
    }

    #[tokio::test]
    async fn test_search_returns_content_addressed_fragment() {
        let completer = Arc::new(EchoCompleter {
            reply: "TSMC fabricates Nvidia's H100.".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let search = LlmResearchSearch::new(completer.clone());

        let first = search.search(&query(0)).await.unwrap();
        let second = search.search(&query(1)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert!(first[0].observed_at.is_some());
        assert_eq!(first[0].source_ref.as_deref(), Some("research:research-model:TSMC"));

        let prompts = completer.prompts.lock().unwrap();
        assert!(prompts[0].contains("suppliers, customers and partners"));
        assert!(prompts[1].contains("competitors and market position"));
        assert!(prompts[0].contains("affects Nvidia"));
    }

    #[tokio::test]
    async fn test_search_failure_maps_to_unavailable() {
        let search = LlmResearchSearch::new(Arc::new(EchoCompleter {
            reply: "fail".into(),
            prompts: Mutex::new(Vec::new()),
        }));
        assert!(matches!(
            search.search(&query(0)).await,
            Err(SearchError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_reply_yields_no_fragments() {
        let search = LlmResearchSearch::new(Arc::new(EchoCompleter {
            reply: "   ".into(),
            prompts: Mutex::new(Vec::new()),
        }));
        assert!(search.search(&query(0)).await.unwrap().is_empty());
    }
}
