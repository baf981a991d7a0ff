//! LLM-backed fragment extraction

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::graph::{CandidateSubgraph, Fragment};
use crate::error::ExtractionError;
use crate::llm::{ChatCompleter, Prompt};

use super::adapter::{FragmentExtractor, parse_extraction_response};

/// Extracts entities and relationships relevant to one target
#[derive(Clone)]
pub struct LlmFragmentExtractor {
    completer: Arc<dyn ChatCompleter>,
    target: String,
}

impl LlmFragmentExtractor {
    pub fn new(completer: Arc<dyn ChatCompleter>, target: impl Into<String>) -> Self {
        Self {
            completer,
            target: target.into(),
        }
    }

    fn build_extraction_prompt(&self, fragment: &Fragment) -> String {
        let source = fragment.source_ref.as_deref().unwrap_or("unknown");
        format!(
            r#"Extract the entities and relationships from the text below that matter for {target}.

SOURCE: {source}

TEXT:
"""
{text}
"""

Return JSON with this exact shape:
{{
  "nodes": [
    {{"tempId": "n1", "name": "...", "type": "Company|Product|Person|Event|Regulation", "description": "...", "aliases": ["..."]}}
  ],
  "edges": [
    {{"sourceTempId": "n1", "targetTempId": "n2", "edge_type": "supplies", "connection_strength": "weak|neutral|strong", "description": "..."}}
  ]
}}

Use tempIds only to connect edges to nodes of this response."#,
            target = self.target,
            source = source,
            text = fragment.text,
        )
    }
}

#[async_trait]
impl FragmentExtractor for LlmFragmentExtractor {
    async fn extract(&self, fragment: &Fragment) -> Result<CandidateSubgraph, ExtractionError> {
        info!(fragment_id = %fragment.id, target = %self.target, "Extracting candidates from fragment");

        let prompt = Prompt::json(EXTRACTION_SYSTEM_PROMPT, self.build_extraction_prompt(fragment));

        let response = self
            .completer
            .complete(prompt)
            .await
            .map_err(ExtractionError::from)?;

        let subgraph = parse_extraction_response(fragment, &response.text).inspect_err(|e| {
            warn!(fragment_id = %fragment.id, error = %e, "Failed to parse extraction response");
        })?;

        info!(
            fragment_id = %fragment.id,
            node_count = subgraph.nodes.len(),
            edge_count = subgraph.edges.len(),
            "Candidates extracted from fragment"
        );

        Ok(subgraph)
    }
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a financial research analyst building an investment graph.

Your task is to read one piece of text and identify the entities and relationships in it that can have a direct causal impact on the target.

Guidelines:
1. Entity types are exactly: Company, Product, Person, Event, Regulation
2. Use the most common full name of each entity; list other spellings as aliases
3. Relationship labels are short verb phrases (e.g. "supplies", "competes with", "regulates")
4. Rate each relationship as weak, neutral or strong based only on this text
5. Only report what the text supports

Return valid JSON only, with no additional text or explanation."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{ConnectionStrength, NodeType};
    use crate::error::{Error, Result};
    use crate::llm::{Completion, ReplyFormat};
    use std::sync::Mutex;

    struct ScriptedCompleter {
        reply: Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompleter {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: Error) -> Self {
            Self {
                reply: Err(error),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatCompleter for ScriptedCompleter {
        async fn complete(&self, prompt: Prompt) -> Result<Completion> {
            assert_eq!(prompt.format, ReplyFormat::JsonObject);
            self.prompts.lock().unwrap().push(prompt.user);
            match &self.reply {
                Ok(text) => Ok(Completion::scripted("scripted", text.clone())),
                Err(e) => Err(Error::LLMError(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_extract_builds_subgraph() {
        let completer = Arc::new(ScriptedCompleter::replying(
            r#"{"nodes": [{"tempId": "a", "name": "ASML", "type": "Company"}, {"tempId": "b", "name": "TSMC", "type": "Company"}],
                "edges": [{"sourceTempId": "a", "targetTempId": "b", "edge_type": "supplies", "connection_strength": "strong"}]}"#,
        ));
        let extractor = LlmFragmentExtractor::new(completer.clone(), "Nvidia");
        let fragment = Fragment::new("f1", "ASML ships EUV tools to TSMC").with_source_ref("news:42");

        let subgraph = extractor.extract(&fragment).await.unwrap();
        assert_eq!(subgraph.nodes[0].node_type, Some(NodeType::Company));
        assert_eq!(subgraph.edges[0].connection_strength, ConnectionStrength::Strong);

        let prompts = completer.prompts.lock().unwrap();
        assert!(prompts[0].contains("matter for Nvidia"));
        assert!(prompts[0].contains("ASML ships EUV tools"));
        assert!(prompts[0].contains("news:42"));
    }

    #[tokio::test]
    async fn test_remote_failure_is_remote_unavailable() {
        let completer = Arc::new(ScriptedCompleter::failing(Error::LLMError("Server error (503)".into())));
        let extractor = LlmFragmentExtractor::new(completer, "Nvidia");

        let result = extractor.extract(&Fragment::new("f1", "text")).await;
        assert!(matches!(result, Err(ExtractionError::RemoteUnavailable(_))));
    }

    #[tokio::test]
    async fn test_prose_reply_is_schema_invalid() {
        let completer = Arc::new(ScriptedCompleter::replying("Sorry, nothing relevant here."));
        let extractor = LlmFragmentExtractor::new(completer, "Nvidia");

        let result = extractor.extract(&Fragment::new("f1", "text")).await;
        assert!(matches!(result, Err(ExtractionError::SchemaInvalid(_))));
    }
}
