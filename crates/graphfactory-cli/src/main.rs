//! Graphfactory CLI - investment graph builder

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use graphfactory_core::Error as CoreError;
use graphfactory_core::config::Config;
use graphfactory_core::domain::graph::{ExportedGraph, Fragment, IntegrityReport, summary};
use graphfactory_core::domain::ranking::NodePrioritizer;
use graphfactory_core::domain::weighting::{CoOccurrenceSource, CoOccurrenceTable, NoCoOccurrence};
use graphfactory_core::expansion::{ExpansionScheduler, LlmResearchSearch, RunReport};
use graphfactory_core::extraction::LlmFragmentExtractor;
use graphfactory_core::llm::{ChatCompleter, LlmClient};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "graphfactory")]
#[command(author, version, about = "Weighted investment graph builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph around a target company
    Build(BuildArgs),

    /// Rank the nodes of an exported graph
    Rank {
        /// Exported graph file
        graph: PathBuf,
        /// Number of nodes to show
        #[arg(short, long, default_value_t = 10)]
        top: usize,
    },

    /// Summarize an exported graph and check its integrity
    Inspect {
        /// Exported graph file
        graph: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Company to build the graph around
    target: String,
    /// Seed fragments: JSON array of {id, text, sourceRef?, observedAt?}
    #[arg(short, long)]
    fragments: Option<PathBuf>,
    /// Co-occurrence table: JSON array of {a, b, count, recency_timestamp?}
    #[arg(long)]
    cooccurrence: Option<PathBuf>,
    /// Output file (defaults to <target>_graph.json)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Refinement iterations after the fundament
    #[arg(long)]
    iterations: Option<u32>,
    /// Nodes expanded per iteration
    #[arg(long)]
    top_n: Option<usize>,
    /// Concurrent extraction and search calls
    #[arg(long)]
    workers: Option<usize>,
    /// Wall-clock limit for the run in seconds
    #[arg(long)]
    deadline: Option<u64>,
    /// Data source recorded in the export metadata
    #[arg(long, default_value = "news")]
    data_source: String,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", describe_failure(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("graphfactory=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => cmd_build(args, cli.format, cli.quiet).await,
        Commands::Rank { graph, top } => cmd_rank(&graph, top, cli.format, cli.quiet),
        Commands::Inspect { graph } => cmd_inspect(&graph, cli.format, cli.quiet),
        Commands::Config { action } => cmd_config(action, cli.quiet),
        Commands::Doctor => cmd_doctor(cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_build(args: BuildArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(iterations) = args.iterations {
        config.pipeline.iteration_budget = iterations;
    }
    if let Some(top_n) = args.top_n {
        config.pipeline.top_n = top_n;
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_pool_size = workers;
    }
    if let Some(deadline) = args.deadline {
        config.pipeline.deadline_secs = deadline;
    }
    config.validate()?;

    let api_key = config.llm.resolved_api_key()?.ok_or_else(|| {
        anyhow!("No API key configured. Set GRAPHFACTORY_API_KEY or OPENROUTER_API_KEY.")
    })?;

    let fragments = match &args.fragments {
        Some(path) => load_fragments(path)?,
        None => Vec::new(),
    };
    let stats: Arc<dyn CoOccurrenceSource> = match &args.cooccurrence {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Arc::new(CoOccurrenceTable::from_json(&json)?)
        }
        None => Arc::new(NoCoOccurrence),
    };

    let client: Arc<dyn ChatCompleter> = Arc::new(LlmClient::new(config.llm.clone(), api_key)?);
    let extractor = Arc::new(LlmFragmentExtractor::new(client.clone(), args.target.as_str()));
    let search = Arc::new(LlmResearchSearch::new(client));
    let scheduler = ExpansionScheduler::from_config(&config, extractor, search, stats);

    let token = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with the graph built so far");
            token.cancel();
        }
    });

    info!(target_name = %args.target, fragments = fragments.len(), "Building graph");
    let run = scheduler.run(&args.target, fragments).await?;

    let output = args
        .output
        .unwrap_or_else(|| default_output_path(&args.target));
    let exported = run.export(args.data_source.as_str());
    std::fs::write(&output, exported.to_json_pretty()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run.report)?),
        OutputFormat::Text if !quiet => {
            print!("{}", summary(&run.graph));
            println!();
            print!("{}", format_report(&run.report));
            println!();
            println!("Graph written to {}", output.display());
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

fn cmd_rank(path: &Path, top: usize, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let graph = load_graph(path)?.into_graph()?;
    let ranked: Vec<_> = NodePrioritizer::new((&config.ranking).into())
        .rank(&graph)
        .into_iter()
        .take(top)
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ranked)?),
        OutputFormat::Text => {
            if !quiet {
                println!("Most important nodes for {}:", graph.target());
            }
            for (position, node) in ranked.iter().enumerate() {
                println!(
                    "{:>3}. {:<40} {:.4}  ({} mentions)",
                    position + 1,
                    node.name,
                    node.score,
                    node.occurrence_count
                );
            }
        }
    }
    Ok(())
}

fn cmd_inspect(path: &Path, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let exported = load_graph(path)?;
    let report = exported.integrity_report();

    if let OutputFormat::Json = format {
        let json = serde_json::json!({
            "target": exported.target,
            "statistics": exported.metadata.statistics,
            "orphaned_nodes": report.orphaned_nodes,
            "dangling_edges": report.dangling_edges.len(),
            "duplicate_edges": report.duplicate_edges.len(),
            "duplicate_names": report.duplicate_names.len(),
            "clean": report.is_clean(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        if !quiet && report.dangling_edges.is_empty() && report.duplicate_edges.is_empty() {
            print!("{}", summary(&exported.clone().into_graph()?));
            println!();
        }
        print_integrity(&report, quiet);
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(anyhow!("{} failed integrity checks", path.display()))
    }
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => println!("{}", Config::load()?.get(&key)?),
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {key} = {value}");
            }
        }
        ConfigAction::List => {
            for (key, value) in Config::load()?.list()? {
                println!("{key} = {value}");
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => println!("{}", Config::config_path()?.display()),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckStatus {
    Ok,
    Failed,
    Note,
}

impl CheckStatus {
    fn marker(self) -> &'static str {
        match self {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Failed => "[!!]",
            CheckStatus::Note => "[--]",
        }
    }
}

struct Check {
    status: CheckStatus,
    label: &'static str,
    detail: String,
}

impl Check {
    fn new(status: CheckStatus, label: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            label,
            detail: detail.into(),
        }
    }
}

fn doctor_checks() -> Vec<Check> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => return vec![Check::new(CheckStatus::Failed, "Configuration", format!("{e:#}"))],
    };

    let mut checks = vec![match config.validate() {
        Ok(()) => Check::new(CheckStatus::Ok, "Configuration", "Valid"),
        Err(e) => Check::new(CheckStatus::Failed, "Configuration", e.to_string()),
    }];

    checks.push(match config.llm.redacted_api_key() {
        Ok(Some(redacted)) => Check::new(CheckStatus::Ok, "API Key", format!("Configured ({redacted})")),
        Ok(None) => Check::new(
            CheckStatus::Failed,
            "API Key",
            "Not configured (set GRAPHFACTORY_API_KEY or OPENROUTER_API_KEY)",
        ),
        Err(e) => Check::new(CheckStatus::Failed, "API Key", e.to_string()),
    });

    // The key is never sent; this only checks the endpoint and model list
    checks.push(match LlmClient::new(config.llm.clone(), "placeholder") {
        Ok(client) => Check::new(
            CheckStatus::Note,
            "Models",
            format!("{} via {}", client.models().join(" -> "), client.endpoint()),
        ),
        Err(e) => Check::new(CheckStatus::Failed, "Models", e.to_string()),
    });

    checks.push(Check::new(
        CheckStatus::Note,
        "Pipeline",
        format!(
            "{} iterations, top {}, {} workers",
            config.pipeline.iteration_budget, config.pipeline.top_n, config.pipeline.worker_pool_size
        ),
    ));

    checks.push(match Config::config_path() {
        Ok(path) if path.exists() => Check::new(CheckStatus::Ok, "Config file", path.display().to_string()),
        Ok(path) => Check::new(
            CheckStatus::Note,
            "Config file",
            format!("{} (using defaults)", path.display()),
        ),
        Err(e) => Check::new(CheckStatus::Failed, "Config file", e.to_string()),
    });

    checks
}

fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    let checks = doctor_checks();
    let failed = checks.iter().filter(|c| c.status == CheckStatus::Failed).count();

    if !quiet {
        println!("Graphfactory Health Check");
        println!("=========================");
        println!();
    }
    for check in checks.iter().filter(|c| !quiet || c.status == CheckStatus::Failed) {
        println!("{} {}: {}", check.status.marker(), check.label, check.detail);
    }

    if failed > 0 {
        warn!(failed, "Health check found problems");
    }
    if !quiet {
        println!();
        match failed {
            0 => println!("All checks passed!"),
            n => println!("{n} check(s) failed. See above for details."),
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_fragments(path: &Path) -> anyhow::Result<Vec<Fragment>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("{} is not a JSON array of fragments", path.display()))
}

fn load_graph(path: &Path) -> anyhow::Result<ExportedGraph> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(ExportedGraph::from_json(&json)?)
}

fn default_output_path(target: &str) -> PathBuf {
    let stem: String = target
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    PathBuf::from(format!("{}_graph.json", stem))
}

fn format_report(report: &RunReport) -> String {
    let mut lines = vec![format!("Run {}", report.run_id)];
    lines.push(format!("  Status: {:?}", report.status));
    if let Some(reason) = report.stop_reason {
        lines.push(format!("  Stopped: {:?}", reason));
    }
    lines.push(format!("  Iterations: {}", report.iterations_completed));
    lines.push(format!(
        "  Fragments: {}/{} merged",
        report.fragments_succeeded, report.fragments_attempted
    ));
    lines.push(format!("  Expansions: {}", report.expansions_attempted));
    lines.push(format!(
        "  Edges weighted: {} ({} low confidence)",
        report.edges_weighted, report.low_confidence_edges
    ));
    if !report.errors.is_empty() {
        lines.push("  Absorbed errors:".to_string());
        for (kind, count) in &report.errors {
            lines.push(format!("    {}: {}", kind, count));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Error line for stderr, tagged with the core error code and a next step when one is known
fn describe_failure(err: &anyhow::Error) -> String {
    let core = err.chain().find_map(|cause| cause.downcast_ref::<CoreError>());
    match core {
        Some(core) => {
            let mut out = format!("Error [{}]: {:#}", core.code(), err);
            if let Some(hint) = core.suggestion() {
                out.push_str(&format!("\n  Try: {}", hint));
            }
            out
        }
        None => format!("Error: {:#}", err),
    }
}

fn print_integrity(report: &IntegrityReport, quiet: bool) {
    let checks = [
        ("Dangling edges", report.dangling_edges.len()),
        ("Duplicate edges", report.duplicate_edges.len()),
        ("Duplicate names", report.duplicate_names.len()),
    ];
    for (label, count) in checks {
        if count == 0 {
            if !quiet {
                println!("[OK] {}: none", label);
            }
        } else {
            println!("[!!] {}: {}", label, count);
        }
    }
    if !quiet && !report.orphaned_nodes.is_empty() {
        println!("[--] Orphaned nodes: {}", report.orphaned_nodes.len());
    }
}
