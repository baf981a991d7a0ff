//! Final edge weight computation
//!
//! ```text
//! cooc       = count / (count + half_saturation)
//! base       = (1 - blend) * aggregated_strength + blend * cooc
//! decay(d)   = decay_base ^ d
//! recency(a) = 0.5 ^ (age_days / half_life_days)
//! final      = clamp(base * decay(d) * recency(age), 0, 1)
//! ```
//!
//! Without a statistic the final weight is the aggregated strength and the
//! edge is marked low confidence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::WeightingConfig;
use crate::domain::graph::{Edge, EdgeKey, InvestmentGraph, WeightAssignment, WeightConfidence};

use super::cooccurrence::CoOccurrenceStat;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Constants of the weight formula
#[derive(Debug, Clone, PartialEq)]
pub struct WeightingParams {
    pub cooccurrence_blend: f64,
    pub cooccurrence_half_saturation: f64,
    pub distance_decay_base: f64,
    pub recency_half_life_days: f64,
    pub unreachable_distance: u32,
}

impl Default for WeightingParams {
    fn default() -> Self {
        Self::from(&WeightingConfig::default())
    }
}

impl From<&WeightingConfig> for WeightingParams {
    fn from(config: &WeightingConfig) -> Self {
        Self {
            cooccurrence_blend: config.cooccurrence_blend.clamp(0.0, 1.0),
            cooccurrence_half_saturation: config.cooccurrence_half_saturation.max(f64::EPSILON),
            distance_decay_base: config.distance_decay_base.clamp(f64::EPSILON, 1.0),
            recency_half_life_days: config.recency_half_life_days.max(f64::EPSILON),
            unreachable_distance: config.unreachable_distance,
        }
    }
}

/// Pure function of an edge, its distance from the target, an optional
/// statistic and the evaluation time
#[derive(Debug, Clone, Default)]
pub struct EdgeWeightCalculator {
    params: WeightingParams,
}

impl EdgeWeightCalculator {
    pub fn new(params: WeightingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &WeightingParams {
        &self.params
    }

    /// Co-occurrence count mapped into [0, 1)
    pub fn normalize_count(&self, count: u64) -> f64 {
        let count = count as f64;
        count / (count + self.params.cooccurrence_half_saturation)
    }

    pub fn decay(&self, distance: u32) -> f64 {
        self.params
            .distance_decay_base
            .powi(distance.min(i32::MAX as u32) as i32)
    }

    /// Recency factor for an observation time; 1.0 when unknown or in the future
    pub fn recency(&self, observed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(observed_at) = observed_at else {
            return 1.0;
        };
        let age_days = ((now - observed_at).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0);
        0.5f64.powf(age_days / self.params.recency_half_life_days)
    }

    pub fn compute_final_weight(
        &self,
        edge: &Edge,
        distance: u32,
        stat: Option<&CoOccurrenceStat>,
        now: DateTime<Utc>,
    ) -> WeightAssignment {
        let strength = edge.aggregated_strength();
        let Some(stat) = stat else {
            return WeightAssignment {
                weight: strength.clamp(0.0, 1.0),
                confidence: WeightConfidence::Low,
            };
        };

        let blend = self.params.cooccurrence_blend;
        let base = (1.0 - blend) * strength + blend * self.normalize_count(stat.count);
        let observed_at = stat.recency_timestamp.or(edge.last_observed_at());
        let weight = base * self.decay(distance) * self.recency(observed_at, now);

        WeightAssignment {
            weight: weight.clamp(0.0, 1.0),
            confidence: WeightConfidence::High,
        }
    }

    /// Weights for every edge of a graph; edges missing from `stats` fall back
    /// to low confidence
    pub fn weigh_graph(
        &self,
        graph: &InvestmentGraph,
        stats: &BTreeMap<EdgeKey, CoOccurrenceStat>,
        now: DateTime<Utc>,
    ) -> Vec<(EdgeKey, WeightAssignment)> {
        let distances = graph.edge_distances(self.params.unreachable_distance);
        graph
            .edges()
            .map(|edge| {
                let distance = distances
                    .get(edge.key())
                    .copied()
                    .unwrap_or(self.params.unreachable_distance);
                let assignment =
                    self.compute_final_weight(edge, distance, stats.get(edge.key()), now);
                (edge.key().clone(), assignment)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{
        CandidateEdge, CandidateNode, CandidateSubgraph, ConnectionStrength, GraphMerger, NodeType,
    };
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn graph_with_strengths(strengths: &[ConnectionStrength]) -> InvestmentGraph {
        let mut merger = GraphMerger::new(InvestmentGraph::new("Nvidia"));
        merger.seed("Nvidia", NodeType::Company);
        for (i, strength) in strengths.iter().enumerate() {
            merger.merge(
                &CandidateSubgraph::new(format!("f{i}"))
                    .with_node(CandidateNode::new("a", "TSMC", NodeType::Company))
                    .with_node(CandidateNode::new("b", "Nvidia", NodeType::Company))
                    .with_edge(CandidateEdge::new("a", "b", "supplies", *strength)),
            );
        }
        merger.into_graph()
    }

    fn stat(count: u64) -> CoOccurrenceStat {
        CoOccurrenceStat {
            count,
            recency_timestamp: Some(now()),
        }
    }

    #[test]
    fn test_missing_stat_falls_back_to_strength() {
        let graph = graph_with_strengths(&[ConnectionStrength::Strong, ConnectionStrength::Neutral]);
        let edge = graph.edges().next().unwrap();
        let calc = EdgeWeightCalculator::default();

        let assignment = calc.compute_final_weight(edge, 0, None, now());
        assert!((assignment.weight - 0.7).abs() < 1e-12);
        assert_eq!(assignment.confidence, WeightConfidence::Low);
    }

    #[test]
    fn test_formula_with_stat() {
        let graph = graph_with_strengths(&[ConnectionStrength::Strong]);
        let edge = graph.edges().next().unwrap();
        let calc = EdgeWeightCalculator::new(WeightingParams {
            cooccurrence_blend: 0.5,
            cooccurrence_half_saturation: 10.0,
            distance_decay_base: 0.5,
            recency_half_life_days: 30.0,
            unreachable_distance: 3,
        });

        // base = 0.5 * 0.9 + 0.5 * (10 / 20) = 0.7, one hop halves it
        let assignment = calc.compute_final_weight(edge, 1, Some(&stat(10)), now());
        assert!((assignment.weight - 0.35).abs() < 1e-12);
        assert_eq!(assignment.confidence, WeightConfidence::High);

        let old = CoOccurrenceStat {
            count: 10,
            recency_timestamp: Some(now() - Duration::days(30)),
        };
        let aged = calc.compute_final_weight(edge, 0, Some(&old), now());
        assert!((aged.weight - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_decay_and_recency_are_non_increasing() {
        let calc = EdgeWeightCalculator::default();
        let mut previous = f64::INFINITY;
        for d in 0..6 {
            let value = calc.decay(d);
            assert!(value <= previous);
            previous = value;
        }

        let mut previous = f64::INFINITY;
        for days in [0, 1, 30, 365, 3650] {
            let value = calc.recency(Some(now() - Duration::days(days)), now());
            assert!(value <= previous);
            previous = value;
        }
        assert_eq!(calc.recency(None, now()), 1.0);
        assert_eq!(calc.recency(Some(now() + Duration::days(5)), now()), 1.0);
    }

    #[test]
    fn test_weight_grows_with_cooccurrence_and_stays_in_range() {
        let graph = graph_with_strengths(&[ConnectionStrength::Strong]);
        let edge = graph.edges().next().unwrap();
        let calc = EdgeWeightCalculator::default();

        let low = calc.compute_final_weight(edge, 0, Some(&stat(1)), now()).weight;
        let high = calc.compute_final_weight(edge, 0, Some(&stat(10_000)), now()).weight;
        assert!(low < high);
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn test_is_pure() {
        let graph = graph_with_strengths(&[ConnectionStrength::Weak, ConnectionStrength::Strong]);
        let edge = graph.edges().next().unwrap();
        let calc = EdgeWeightCalculator::default();
        let a = calc.compute_final_weight(edge, 2, Some(&stat(7)), now());
        let b = calc.compute_final_weight(edge, 2, Some(&stat(7)), now());
        assert_eq!(a, b);
    }

    #[test]
    fn test_weigh_graph_uses_target_distance() {
        let graph = graph_with_strengths(&[ConnectionStrength::Strong]);
        let key = graph.edges().next().unwrap().key().clone();
        let calc = EdgeWeightCalculator::default();

        let mut stats = BTreeMap::new();
        stats.insert(key.clone(), stat(50));
        let weights = calc.weigh_graph(&graph, &stats, now());

        assert_eq!(weights.len(), 1);
        // the edge touches the target, so no decay applies
        let expected = 0.7 * 0.9 + 0.3 * 0.5;
        assert!((weights[0].1.weight - expected).abs() < 1e-12);
    }
}
