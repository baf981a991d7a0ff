//! Graph edges, connection strengths and edge-type canonicalization

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fragment::FragmentId;
use super::node::{NodeId, prefers_description};

/// Per-fragment connection strength, quantized at extraction time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStrength {
    Weak,
    Neutral,
    Strong,
}

impl ConnectionStrength {
    pub fn value(&self) -> f64 {
        match self {
            Self::Weak => 0.1,
            Self::Neutral => 0.5,
            Self::Strong => 0.9,
        }
    }

    /// Quantize a raw score to the nearest level
    pub fn from_value(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Some(if value < 0.3 {
            Self::Weak
        } else if value < 0.7 {
            Self::Neutral
        } else {
            Self::Strong
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Neutral => "neutral",
            Self::Strong => "strong",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "weak" => Some(Self::Weak),
            "neutral" | "medium" => Some(Self::Neutral),
            "strong" => Some(Self::Strong),
            other => other.parse::<f64>().ok().and_then(Self::from_value),
        }
    }

    /// Read a strength from an extraction response, which may carry a number or a label
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().and_then(Self::from_value),
            serde_json::Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

/// Maps free-form relationship labels onto merge keys.
///
/// Labels are trimmed, lowercased, `-`/`_` become spaces and whitespace is
/// collapsed; the result is then looked up in a synonym table.
#[derive(Debug, Clone)]
pub struct EdgeTypeCanonicalizer {
    synonyms: BTreeMap<String, String>,
}

const DEFAULT_SYNONYMS: &[(&str, &str)] = &[
    ("supplier of", "supplies"),
    ("supplier to", "supplies"),
    ("supplies to", "supplies"),
    ("competitor of", "competes with"),
    ("competes against", "competes with"),
    ("rival of", "competes with"),
    ("customer of", "buys from"),
    ("subsidiary of", "owned by"),
    ("parent of", "owns"),
    ("partner of", "partners with"),
    ("partnership with", "partners with"),
];

impl Default for EdgeTypeCanonicalizer {
    fn default() -> Self {
        let synonyms = DEFAULT_SYNONYMS
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self { synonyms }
    }
}

impl EdgeTypeCanonicalizer {
    /// Canonicalizer without any synonym entries
    pub fn plain() -> Self {
        Self {
            synonyms: BTreeMap::new(),
        }
    }

    /// Add synonym entries; both sides are normalized first
    pub fn with_synonyms<'a>(mut self, entries: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (from, to) in entries {
            let (from, to) = (Self::normalize(from), Self::normalize(to));
            if !from.is_empty() && !to.is_empty() {
                self.synonyms.insert(from, to);
            }
        }
        self
    }

    pub fn normalize(raw: &str) -> String {
        raw.trim()
            .to_lowercase()
            .replace(['-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Canonical form of a label, or `None` when it is empty
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let normalized = Self::normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        Some(self.synonyms.get(&normalized).cloned().unwrap_or(normalized))
    }
}

/// Merge key of an edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: String,
}

impl EdgeKey {
    pub fn new(source: NodeId, target: NodeId, edge_type: impl Into<String>) -> Self {
        Self {
            source,
            target,
            edge_type: edge_type.into(),
        }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.edge_type, self.target)
    }
}

/// One fragment's contribution to an edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub strength: f64,
    pub observed_at: Option<DateTime<Utc>>,
}

/// How much the final weight can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightConfidence {
    /// Co-occurrence statistic was available
    High,
    /// Fell back to aggregated strength alone
    Low,
}

/// A directed, typed relationship with its aggregated evidence
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    key: EdgeKey,
    pub description: String,
    observations: BTreeMap<FragmentId, Observation>,
    aggregated_strength: f64,
    last_observed_at: Option<DateTime<Utc>>,
    final_weight: Option<f64>,
    weight_confidence: Option<WeightConfidence>,
}

impl Edge {
    pub(crate) fn new(key: EdgeKey) -> Self {
        Self {
            key,
            description: String::new(),
            observations: BTreeMap::new(),
            aggregated_strength: 0.0,
            last_observed_at: None,
            final_weight: None,
            weight_confidence: None,
        }
    }

    pub fn key(&self) -> &EdgeKey {
        &self.key
    }

    pub fn source(&self) -> NodeId {
        self.key.source
    }

    pub fn target(&self) -> NodeId {
        self.key.target
    }

    pub fn edge_type(&self) -> &str {
        &self.key.edge_type
    }

    pub fn occurrence_count(&self) -> usize {
        self.observations.len()
    }

    /// Mean of all observed strengths
    pub fn aggregated_strength(&self) -> f64 {
        self.aggregated_strength
    }

    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.last_observed_at
    }

    pub fn final_weight(&self) -> Option<f64> {
        self.final_weight
    }

    pub fn weight_confidence(&self) -> Option<WeightConfidence> {
        self.weight_confidence
    }

    /// Weight used for ranking: the final weight once computed, else the aggregated strength
    pub fn effective_weight(&self) -> f64 {
        self.final_weight.unwrap_or(self.aggregated_strength)
    }

    /// Whether this fragment already contributed an observation
    pub fn observed_in(&self, fragment_id: &str) -> bool {
        self.observations.contains_key(fragment_id)
    }

    /// Fold one fragment's observation in.
    ///
    /// Returns false, leaving the edge untouched, when the fragment was already
    /// recorded. The mean is re-summed in fragment-id order so the value is
    /// identical whatever order observations arrive in.
    pub(crate) fn observe(&mut self, fragment_id: &str, observation: Observation) -> bool {
        if self.observations.contains_key(fragment_id) {
            return false;
        }
        self.observations
            .insert(fragment_id.to_string(), observation);

        let sum: f64 = self.observations.values().map(|o| o.strength).sum();
        self.aggregated_strength = sum / self.observations.len() as f64;
        self.last_observed_at = self.last_observed_at.max(observation.observed_at);
        self.final_weight = None;
        self.weight_confidence = None;
        true
    }

    pub(crate) fn offer_description(&mut self, description: &str) -> bool {
        let description = description.trim();
        if prefers_description(&self.description, description) {
            self.description = description.to_string();
            true
        } else {
            false
        }
    }

    pub(crate) fn set_final_weight(&mut self, weight: f64, confidence: Option<WeightConfidence>) {
        self.final_weight = Some(weight.clamp(0.0, 1.0));
        self.weight_confidence = confidence;
    }
}
