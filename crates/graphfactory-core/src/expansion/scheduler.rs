//! Expansion scheduler
//!
//! Drives one pipeline run through its phases:
//!
//! 1. **Fundament**: every seed fragment is extracted and merged
//! 2. **Iterations**: the top-ranked nodes are expanded through targeted
//!    search, and the new fragments are extracted and merged
//! 3. **Finalizing**: co-occurrence statistics are fetched and final edge
//!    weights are written
//!
//! Extraction, search and lookup calls run on a bounded pool of tasks. Every
//! merge goes through the single [`MergerHandle`] actor, and a phase ends only
//! after all of its tasks have been joined.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::graph::{
    EdgeKey, EdgeTypeCanonicalizer, Fragment, GraphFilter, GraphMerger, InvestmentGraph,
    MergeOutcome, MergerHandle, NodeId, NodeType, WeightConfidence,
};
use crate::domain::ranking::NodePrioritizer;
use crate::domain::weighting::{CoOccurrenceSource, EdgeWeightCalculator, lookup_name};
use crate::error::{Error, ErrorKind, ExtractionError, Result, SearchError, StatLookupError};
use crate::extraction::FragmentExtractor;

use super::report::{PipelineRun, RunReport, RunStatus, StopReason};
use super::search::{SearchQuery, TargetedSearch};
use super::state::{SchedulerState, StateTracker};

/// Limits and switches for one run
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub iteration_budget: u32,
    pub top_n: usize,
    pub worker_pool_size: usize,
    pub searches_per_node: usize,
    pub reexpand_nodes: bool,
    pub deadline: Option<Duration>,
    pub extraction_timeout: Duration,
    pub search_timeout: Duration,
    pub stat_timeout: Duration,
    /// Applied after the fundament and after every iteration
    pub filter: Option<GraphFilter>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            iteration_budget: pipeline.iteration_budget,
            top_n: pipeline.top_n,
            worker_pool_size: pipeline.worker_pool_size,
            searches_per_node: pipeline.searches_per_node,
            reexpand_nodes: pipeline.reexpand_nodes,
            deadline: pipeline.deadline(),
            extraction_timeout: pipeline.extraction_timeout(),
            search_timeout: pipeline.search_timeout(),
            stat_timeout: pipeline.stat_timeout(),
            filter: config
                .filter
                .enabled
                .then(|| GraphFilter::from(&config.filter)),
        }
    }
}

impl SchedulerSettings {
    /// Reject settings a run cannot start with
    pub fn validate(&self, target: &str, fragment_count: usize) -> Result<()> {
        if target.trim().is_empty() {
            return fatal("target name is empty");
        }
        if self.worker_pool_size == 0 {
            return fatal("worker_pool_size must be at least 1");
        }
        if fragment_count == 0 && self.iteration_budget == 0 {
            return fatal("no seed fragments and iteration_budget is 0, nothing to build");
        }
        if self.iteration_budget > 0 && self.top_n == 0 {
            return fatal("top_n must be at least 1 when iteration_budget is above 0");
        }
        if self.iteration_budget > 0 && self.searches_per_node == 0 {
            return fatal("searches_per_node must be at least 1 when iteration_budget is above 0");
        }
        for (name, limit) in [
            ("extraction", self.extraction_timeout),
            ("search", self.search_timeout),
            ("stat lookup", self.stat_timeout),
        ] {
            if limit.is_zero() {
                return fatal(format!("{} timeout must be positive", name));
            }
        }
        Ok(())
    }
}

fn fatal(message: impl Into<String>) -> Result<()> {
    Err(Error::SchedulerFatal(message.into()))
}

/// Progress sent by a worker as soon as it happens. Events already sent
/// reach the report even when the task is aborted later.
#[derive(Debug)]
enum TaskEvent {
    FragmentStarted,
    Failed(ErrorKind),
    Merged(MergeOutcome),
}

type EventSender = mpsc::UnboundedSender<TaskEvent>;

fn send(events: &EventSender, event: TaskEvent) {
    // The receiver lives until the phase is drained
    let _ = events.send(event);
}

/// Result of joining every task of a phase
#[derive(Debug, Default)]
struct Drained {
    interrupted: Option<StopReason>,
    grew: bool,
}

pub struct ExpansionScheduler {
    settings: SchedulerSettings,
    extractor: Arc<dyn FragmentExtractor>,
    search: Arc<dyn TargetedSearch>,
    stats: Arc<dyn CoOccurrenceSource>,
    prioritizer: NodePrioritizer,
    calculator: EdgeWeightCalculator,
    canonicalizer: EdgeTypeCanonicalizer,
    cancel: CancellationToken,
}

impl ExpansionScheduler {
    pub fn new(
        extractor: Arc<dyn FragmentExtractor>,
        search: Arc<dyn TargetedSearch>,
        stats: Arc<dyn CoOccurrenceSource>,
    ) -> Self {
        Self {
            settings: SchedulerSettings::default(),
            extractor,
            search,
            stats,
            prioritizer: NodePrioritizer::default(),
            calculator: EdgeWeightCalculator::default(),
            canonicalizer: EdgeTypeCanonicalizer::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Scheduler with every tunable taken from `config`
    pub fn from_config(
        config: &Config,
        extractor: Arc<dyn FragmentExtractor>,
        search: Arc<dyn TargetedSearch>,
        stats: Arc<dyn CoOccurrenceSource>,
    ) -> Self {
        Self::new(extractor, search, stats)
            .with_settings(SchedulerSettings::from(config))
            .with_prioritizer(NodePrioritizer::new((&config.ranking).into()))
            .with_calculator(EdgeWeightCalculator::new((&config.weighting).into()))
            .with_canonicalizer(EdgeTypeCanonicalizer::default().with_synonyms(&config.edge_types))
    }

    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_prioritizer(mut self, prioritizer: NodePrioritizer) -> Self {
        self.prioritizer = prioritizer;
        self
    }

    pub fn with_calculator(mut self, calculator: EdgeWeightCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_canonicalizer(mut self, canonicalizer: EdgeTypeCanonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Token that stops the run early; the run still finalizes and returns
    /// the graph built so far
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the graph for `target` from the seed fragments.
    ///
    /// Only invalid settings fail the run. Failures of single fragments,
    /// searches and lookups are counted in the report instead.
    pub async fn run(&self, target: &str, fragments: Vec<Fragment>) -> Result<PipelineRun> {
        let target = target.trim();
        self.settings.validate(target, fragments.len())?;

        let mut tracker = StateTracker::new();
        let mut report = RunReport::new(target);
        let deadline = self.settings.deadline.map(|limit| Instant::now() + limit);

        info!(
            run_id = %report.run_id,
            target = %target,
            fragments = fragments.len(),
            iteration_budget = self.settings.iteration_budget,
            "Pipeline run started"
        );

        let merger = GraphMerger::new(InvestmentGraph::new(target))
            .with_canonicalizer(self.canonicalizer.clone());
        let (handle, actor) = MergerHandle::spawn(merger);
        let target_id = handle.seed(target, NodeType::Company).await?;

        tracker.advance(SchedulerState::ConstructingFundament)?;
        let fundament = self
            .construct_fundament(&handle, fragments, &mut report, deadline)
            .await;
        self.apply_filter(&handle, target_id, &mut report).await?;

        let stop_reason = match fundament.interrupted {
            Some(reason) => reason,
            None => {
                self.iterate(&handle, target, target_id, &mut tracker, &mut report, deadline)
                    .await?
            }
        };
        report.stop_reason = Some(stop_reason);

        tracker.advance(SchedulerState::Finalizing)?;
        self.finalize(&handle, &mut report).await?;

        drop(handle);
        let graph = actor
            .await
            .map_err(|e| Error::Other(format!("merge actor failed: {}", e)))?
            .into_graph();

        tracker.advance(SchedulerState::Done)?;
        report.status = RunStatus::of(&graph);
        report.finished_at = Some(Utc::now());
        report.state_history = tracker.into_history();

        info!(
            run_id = %report.run_id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            iterations = report.iterations_completed,
            stop_reason = ?stop_reason,
            errors = report.total_errors(),
            "Pipeline run finished"
        );

        Ok(PipelineRun { graph, report })
    }

    async fn construct_fundament(
        &self,
        handle: &MergerHandle,
        fragments: Vec<Fragment>,
        report: &mut RunReport,
        deadline: Option<Instant>,
    ) -> Drained {
        let permits = Arc::new(Semaphore::new(self.settings.worker_pool_size));
        let (events, mut progress) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for fragment in fragments {
            let extractor = Arc::clone(&self.extractor);
            let handle = handle.clone();
            let permits = Arc::clone(&permits);
            let events = events.clone();
            let limit = self.settings.extraction_timeout;
            send(&events, TaskEvent::FragmentStarted);

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                extract_and_merge(extractor.as_ref(), &handle, &fragment, limit, &events).await;
            });
        }
        drop(events);

        self.drain(&mut tasks, &mut progress, report, deadline).await
    }

    async fn iterate(
        &self,
        handle: &MergerHandle,
        target: &str,
        target_id: NodeId,
        tracker: &mut StateTracker,
        report: &mut RunReport,
        deadline: Option<Instant>,
    ) -> Result<StopReason> {
        let mut expanded: BTreeSet<NodeId> = BTreeSet::new();

        for iteration in 1..=self.settings.iteration_budget {
            if let Some(reason) = self.interruption(deadline) {
                return Ok(reason);
            }
            tracker.advance(SchedulerState::Iterating(iteration))?;

            let snapshot = handle.snapshot().await?;
            let selected: Vec<_> = self
                .prioritizer
                .rank(&snapshot)
                .into_iter()
                .filter(|ranked| self.settings.reexpand_nodes || !expanded.contains(&ranked.id))
                .take(self.settings.top_n)
                .filter_map(|ranked| snapshot.node(ranked.id))
                .collect();

            if selected.is_empty() {
                info!(iteration, "No node left to expand");
                return Ok(StopReason::NothingToExpand);
            }

            info!(
                iteration,
                nodes = ?selected.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
                "Expanding top-ranked nodes"
            );

            report.expansions_attempted += selected.len();
            expanded.extend(selected.iter().map(|node| node.id));
            let queries: Vec<SearchQuery> = selected
                .iter()
                .flat_map(|node| {
                    (0..self.settings.searches_per_node)
                        .map(move |attempt| SearchQuery::for_node(node, target, attempt))
                })
                .collect();

            let drained = self.expand(handle, queries, report, deadline).await;
            self.apply_filter(handle, target_id, report).await?;

            if let Some(reason) = drained.interrupted {
                return Ok(reason);
            }
            report.iterations_completed = iteration;
            if !drained.grew {
                info!(iteration, "Iteration added nothing, graph is stable");
                return Ok(StopReason::Stable);
            }
        }

        Ok(StopReason::BudgetExhausted)
    }

    async fn expand(
        &self,
        handle: &MergerHandle,
        queries: Vec<SearchQuery>,
        report: &mut RunReport,
        deadline: Option<Instant>,
    ) -> Drained {
        let permits = Arc::new(Semaphore::new(self.settings.worker_pool_size));
        let (events, mut progress) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        for query in queries {
            let search = Arc::clone(&self.search);
            let extractor = Arc::clone(&self.extractor);
            let handle = handle.clone();
            let permits = Arc::clone(&permits);
            let events = events.clone();
            let search_limit = self.settings.search_timeout;
            let extraction_limit = self.settings.extraction_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                let fragments = match timeout(search_limit, search.search(&query)).await {
                    Ok(Ok(fragments)) => fragments,
                    Ok(Err(e)) => {
                        warn!(node = %query.node_name, error = %e, "Targeted search failed");
                        send(&events, TaskEvent::Failed(e.kind()));
                        return;
                    }
                    Err(_) => {
                        warn!(node = %query.node_name, limit = ?search_limit, "Targeted search timed out");
                        send(&events, TaskEvent::Failed(SearchError::Timeout.kind()));
                        return;
                    }
                };

                debug!(node = %query.node_name, fragments = fragments.len(), "Search returned fragments");
                for fragment in &fragments {
                    send(&events, TaskEvent::FragmentStarted);
                    extract_and_merge(extractor.as_ref(), &handle, fragment, extraction_limit, &events)
                        .await;
                }
            });
        }
        drop(events);

        self.drain(&mut tasks, &mut progress, report, deadline).await
    }

    async fn finalize(&self, handle: &MergerHandle, report: &mut RunReport) -> Result<()> {
        let snapshot = handle.snapshot().await?;

        // One lookup per unordered endpoint pair
        let mut pairs: BTreeMap<(NodeId, NodeId), Vec<EdgeKey>> = BTreeMap::new();
        for edge in snapshot.edges() {
            let key = edge.key();
            let pair = (key.source.min(key.target), key.source.max(key.target));
            pairs.entry(pair).or_default().push(key.clone());
        }

        let permits = Arc::new(Semaphore::new(self.settings.worker_pool_size));
        let mut tasks = JoinSet::new();
        for ((a, b), keys) in pairs {
            let (Some(node_a), Some(node_b)) = (snapshot.node(a), snapshot.node(b)) else {
                continue;
            };
            let name_a = lookup_name(&node_a.name);
            let name_b = lookup_name(&node_b.name);
            let stats = Arc::clone(&self.stats);
            let permits = Arc::clone(&permits);
            let limit = self.settings.stat_timeout;

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = timeout(limit, stats.lookup(&name_a, &name_b))
                    .await
                    .unwrap_or(Err(StatLookupError::Timeout));
                (keys, name_a, name_b, result)
            });
        }

        let mut stats = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((keys, _, _, Ok(stat))) => {
                    for key in keys {
                        stats.insert(key, stat);
                    }
                }
                Ok((_, name_a, name_b, Err(e))) => {
                    debug!(entity_a = %name_a, entity_b = %name_b, error = %e, "Co-occurrence lookup failed");
                    report.record_error(ErrorKind::StatLookup);
                }
                Err(e) => error!(error = %e, "Co-occurrence lookup task failed"),
            }
        }

        let weights = self.calculator.weigh_graph(&snapshot, &stats, Utc::now());
        report.low_confidence_edges = weights
            .iter()
            .filter(|(_, assignment)| assignment.confidence == WeightConfidence::Low)
            .count();
        report.edges_weighted = handle.apply_weights(weights).await?;

        info!(
            edges = report.edges_weighted,
            with_statistics = stats.len(),
            low_confidence = report.low_confidence_edges,
            "Final edge weights written"
        );
        Ok(())
    }

    async fn apply_filter(
        &self,
        handle: &MergerHandle,
        target_id: NodeId,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(filter) = &self.settings.filter {
            let outcome = handle.filter(filter.clone(), vec![target_id]).await?;
            report.nodes_filtered += outcome.nodes_removed;
            report.edges_filtered += outcome.edges_removed;
        }
        Ok(())
    }

    /// Join every task of a phase. On cancellation or deadline the remaining
    /// tasks are aborted; what they merged and reported before that is kept.
    async fn drain(
        &self,
        tasks: &mut JoinSet<()>,
        progress: &mut mpsc::UnboundedReceiver<TaskEvent>,
        report: &mut RunReport,
        deadline: Option<Instant>,
    ) -> Drained {
        let mut drained = Drained::default();
        let interrupted = wait_for_interrupt(self.cancel.clone(), deadline);
        tokio::pin!(interrupted);

        loop {
            tokio::select! {
                biased;
                reason = &mut interrupted => {
                    warn!(reason = ?reason, pending = tasks.len(), "Run interrupted, aborting in-flight work");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    drained.interrupted = Some(reason);
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => error!(error = %e, "Worker task panicked"),
                    None => break,
                },
            }
        }

        // Every sender is gone once the tasks are joined
        while let Some(event) = progress.recv().await {
            drained.grew |= absorb(report, event);
        }
        drained
    }

    fn interruption(&self, deadline: Option<Instant>) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if deadline.is_some_and(|at| Instant::now() >= at) {
            Some(StopReason::DeadlineExceeded)
        } else {
            None
        }
    }
}

async fn wait_for_interrupt(cancel: CancellationToken, deadline: Option<Instant>) -> StopReason {
    tokio::select! {
        _ = cancel.cancelled() => StopReason::Cancelled,
        _ = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        } => StopReason::DeadlineExceeded,
    }
}

async fn extract_and_merge(
    extractor: &dyn FragmentExtractor,
    handle: &MergerHandle,
    fragment: &Fragment,
    limit: Duration,
    events: &EventSender,
) {
    let subgraph = match timeout(limit, extractor.extract(fragment)).await {
        Ok(Ok(subgraph)) => subgraph,
        Ok(Err(e)) => {
            warn!(fragment_id = %fragment.id, error = %e, "Fragment extraction failed");
            send(events, TaskEvent::Failed(e.kind()));
            return;
        }
        Err(_) => {
            let e = ExtractionError::Timeout(limit);
            warn!(fragment_id = %fragment.id, error = %e, "Fragment extraction timed out");
            send(events, TaskEvent::Failed(e.kind()));
            return;
        }
    };

    match handle.merge(subgraph).await {
        Ok(outcome) => send(events, TaskEvent::Merged(outcome)),
        Err(e) => error!(fragment_id = %fragment.id, error = %e, "Merge actor unavailable"),
    }
}

/// Fold one event into the report; true when a merge grew the graph
fn absorb(report: &mut RunReport, event: TaskEvent) -> bool {
    match event {
        TaskEvent::FragmentStarted => {
            report.fragments_attempted += 1;
            false
        }
        TaskEvent::Failed(kind) => {
            report.record_error(kind);
            false
        }
        TaskEvent::Merged(outcome) => {
            report.fragments_succeeded += 1;
            report.record_merge(&outcome);
            outcome.grew()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.pipeline.top_n = 3;
        config.pipeline.deadline_secs = 30;
        config.filter.enabled = true;
        config.filter.min_occurrence_count = 2;

        let settings = SchedulerSettings::from(&config);
        assert_eq!(settings.top_n, 3);
        assert_eq!(settings.deadline, Some(Duration::from_secs(30)));
        assert_eq!(settings.filter.map(|f| f.min_occurrence_count), Some(2));
        assert!(SchedulerSettings::default().filter.is_none());
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        let settings = SchedulerSettings::default();
        assert!(settings.validate("Nvidia", 3).is_ok());
        assert!(settings.validate("Nvidia", 0).is_ok());
        assert!(matches!(settings.validate("  ", 3), Err(Error::SchedulerFatal(_))));

        let no_workers = SchedulerSettings {
            worker_pool_size: 0,
            ..SchedulerSettings::default()
        };
        assert!(matches!(no_workers.validate("Nvidia", 3), Err(Error::SchedulerFatal(_))));

        let nothing_to_do = SchedulerSettings {
            iteration_budget: 0,
            ..SchedulerSettings::default()
        };
        assert!(matches!(nothing_to_do.validate("Nvidia", 0), Err(Error::SchedulerFatal(_))));
        assert!(nothing_to_do.validate("Nvidia", 1).is_ok());

        let no_timeout = SchedulerSettings {
            stat_timeout: Duration::ZERO,
            ..SchedulerSettings::default()
        };
        let err = no_timeout.validate("Nvidia", 1).unwrap_err();
        assert_eq!(err.code(), "E001");
        assert!(err.to_string().contains("stat lookup timeout"));
    }

    #[test]
    fn test_absorb_reports_growth() {
        let mut report = RunReport::new("Nvidia");
        assert!(!absorb(&mut report, TaskEvent::FragmentStarted));
        assert!(!absorb(&mut report, TaskEvent::FragmentStarted));
        assert!(!absorb(&mut report, TaskEvent::Failed(ErrorKind::Timeout)));
        let updated = MergeOutcome {
            edges_updated: 1,
            ..MergeOutcome::default()
        };
        assert!(!absorb(&mut report, TaskEvent::Merged(updated)));

        assert_eq!(report.fragments_attempted, 2);
        assert_eq!(report.fragments_succeeded, 1);
        assert_eq!(report.error_count(ErrorKind::Timeout), 1);

        let created = MergeOutcome {
            nodes_created: 1,
            ..MergeOutcome::default()
        };
        assert!(absorb(&mut report, TaskEvent::Merged(created)));
    }
}
