//! Extraction boundary: one fragment in, one candidate sub-graph out

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::graph::{
    CandidateEdge, CandidateNode, CandidateSubgraph, ConnectionStrength, Fragment, NodeType,
};
use crate::error::ExtractionError;

/// Turns a text fragment into candidate nodes and edges.
///
/// Implementations are stateless apart from their remote client and must be
/// callable concurrently.
#[async_trait]
pub trait FragmentExtractor: Send + Sync {
    async fn extract(&self, fragment: &Fragment) -> Result<CandidateSubgraph, ExtractionError>;
}

/// Wire shape of an extraction response.
///
/// Field-level gaps (an empty name, an unknown type) are kept and left for the
/// merger to drop; only a response that is not this shape at all is rejected.
#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    nodes: Vec<ResponseNode>,
    #[serde(default)]
    edges: Vec<ResponseEdge>,
}

#[derive(Debug, Deserialize)]
struct ResponseNode {
    #[serde(default, alias = "tempId", alias = "temp_id")]
    temp_id: TempId,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    node_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseEdge {
    #[serde(default, alias = "sourceTempId", alias = "source_temp_id", alias = "source")]
    source_temp_id: TempId,
    #[serde(default, alias = "targetTempId", alias = "target_temp_id", alias = "target")]
    target_temp_id: TempId,
    #[serde(default, alias = "edgeType", alias = "type")]
    edge_type: String,
    #[serde(default, alias = "connectionStrength")]
    connection_strength: serde_json::Value,
    #[serde(default)]
    description: Option<String>,
}

/// Temp ids arrive as strings or numbers depending on the model
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum TempId {
    Text(String),
    Number(i64),
    #[default]
    Missing,
}

impl TempId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
            Self::Missing => String::new(),
        }
    }
}

/// Parse a model response into the fragment's candidate sub-graph
pub fn parse_extraction_response(
    fragment: &Fragment,
    response: &str,
) -> Result<CandidateSubgraph, ExtractionError> {
    let parsed: ExtractionResponse = serde_json::from_str(json_payload(response))
        .map_err(|e| ExtractionError::SchemaInvalid(e.to_string()))?;

    let mut subgraph = CandidateSubgraph::for_fragment(fragment);

    for node in parsed.nodes {
        subgraph.nodes.push(CandidateNode {
            temp_id: node.temp_id.into_string(),
            name: node.name,
            node_type: NodeType::parse(&node.node_type),
            description: node.description.filter(|d| !d.trim().is_empty()),
            aliases: node.aliases,
        });
    }

    for edge in parsed.edges {
        let connection_strength = ConnectionStrength::from_json(&edge.connection_strength)
            .unwrap_or_else(|| {
                debug!(
                    fragment_id = %fragment.id,
                    raw = %edge.connection_strength,
                    "Unreadable connection strength, using neutral"
                );
                ConnectionStrength::Neutral
            });
        subgraph.edges.push(CandidateEdge {
            source_temp_id: edge.source_temp_id.into_string(),
            target_temp_id: edge.target_temp_id.into_string(),
            edge_type: edge.edge_type,
            connection_strength,
            description: edge.description.filter(|d| !d.trim().is_empty()),
        });
    }

    Ok(subgraph)
}

/// The JSON object inside a reply that may wrap it in a code fence or prose.
/// Replies with no braces at all are returned trimmed, for serde to reject.
fn json_payload(response: &str) -> &str {
    let body = match response.find("```") {
        Some(open) => {
            let after_fence = &response[open + 3..];
            let content = after_fence
                .find('\n')
                .map_or(after_fence, |nl| &after_fence[nl + 1..]);
            content.find("```").map_or(content, |close| &content[..close])
        }
        None => response,
    };

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camel_case_response() {
        let fragment = Fragment::new("f1", "TSMC makes Nvidia's GPUs");
        let response = r#"```json
        {
          "nodes": [
            {"tempId": "n1", "name": "TSMC", "type": "Company", "description": "Foundry", "aliases": ["Taiwan Semiconductor"]},
            {"tempId": "n2", "name": "Nvidia", "type": "company"}
          ],
          "edges": [
            {"sourceTempId": "n1", "targetTempId": "n2", "edge_type": "supplies", "connection_strength": 0.9}
          ]
        }
        ```"#;

        let subgraph = parse_extraction_response(&fragment, response).unwrap();
        assert_eq!(subgraph.fragment_id, "f1");
        assert_eq!(subgraph.nodes.len(), 2);
        assert_eq!(subgraph.nodes[0].aliases, vec!["Taiwan Semiconductor"]);
        assert_eq!(subgraph.nodes[1].node_type, Some(NodeType::Company));
        assert_eq!(subgraph.edges[0].connection_strength, ConnectionStrength::Strong);
    }

    #[test]
    fn test_numeric_temp_ids_and_labels() {
        let fragment = Fragment::new("f2", "text");
        let response = r#"{
            "nodes": [{"tempId": 1, "name": "A", "type": "Person"}, {"tempId": 2, "name": "B", "type": "Event"}],
            "edges": [{"sourceTempId": 1, "targetTempId": 2, "edge_type": "attends", "connection_strength": "weak"}]
        }"#;

        let subgraph = parse_extraction_response(&fragment, response).unwrap();
        assert_eq!(subgraph.nodes[0].temp_id, "1");
        assert_eq!(subgraph.edges[0].source_temp_id, "1");
        assert_eq!(subgraph.edges[0].connection_strength, ConnectionStrength::Weak);
    }

    #[test]
    fn test_field_gaps_are_passed_through() {
        let fragment = Fragment::new("f3", "text");
        let response = r#"{"nodes": [{"tempId": "n1", "type": "Sector"}], "edges": [{"sourceTempId": "n1"}]}"#;

        let subgraph = parse_extraction_response(&fragment, response).unwrap();
        assert_eq!(subgraph.nodes[0].name, "");
        assert_eq!(subgraph.nodes[0].node_type, None);
        assert_eq!(subgraph.edges[0].target_temp_id, "");
        assert_eq!(subgraph.edges[0].connection_strength, ConnectionStrength::Neutral);
    }

    #[test]
    fn test_wrong_shape_is_schema_invalid() {
        let fragment = Fragment::new("f4", "text");
        assert!(matches!(
            parse_extraction_response(&fragment, "I could not find any entities."),
            Err(ExtractionError::SchemaInvalid(_))
        ));
        assert!(matches!(
            parse_extraction_response(&fragment, r#"{"nodes": "none"}"#),
            Err(ExtractionError::SchemaInvalid(_))
        ));
    }

    #[test]
    fn test_json_payload_unwraps_fences_and_prose() {
        assert_eq!(json_payload("```json\n{\"nodes\": []}\n```"), "{\"nodes\": []}");
        assert_eq!(json_payload("```\n{\"nodes\": []}\n```"), "{\"nodes\": []}");
        assert_eq!(json_payload("Sure. {\"nodes\": []} Done."), "{\"nodes\": []}");
        assert_eq!(json_payload("  no json here "), "no json here");
    }
}
