//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// graphfactory configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub filter: FilterConfig,
    pub weighting: WeightingConfig,
    pub ranking: RankingConfig,
    /// Synonym table applied after edge-type normalisation (`from -> to`)
    pub edge_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Read only so a key left in config.toml fails validation; keys come from the environment
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            default_model: "openai/gpt-4o".to_string(),
            fallback_models: vec!["anthropic/claude-3-5-haiku-latest".to_string()],
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

/// Expansion loop and worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of refinement iterations after the fundament
    pub iteration_budget: u32,
    /// Nodes selected for expansion per iteration
    pub top_n: usize,
    /// Maximum in-flight external calls
    pub worker_pool_size: usize,
    /// Targeted searches issued per selected node
    pub searches_per_node: usize,
    /// Allow a node to be expanded again in a later iteration
    pub reexpand_nodes: bool,
    /// Overall wall-clock budget for the fundament and iterations (0 = none)
    pub deadline_secs: u64,
    pub extraction_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub stat_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            iteration_budget: 2,
            top_n: 10,
            worker_pool_size: 8,
            searches_per_node: 1,
            reexpand_nodes: false,
            deadline_secs: 0,
            extraction_timeout_secs: 90,
            search_timeout_secs: 180,
            stat_timeout_secs: 15,
        }
    }
}

impl PipelineConfig {
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn stat_timeout(&self) -> Duration {
        Duration::from_secs(self.stat_timeout_secs)
    }
}

/// Low-signal pruning applied after each merge phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Edges and nodes seen in fewer fragments than this are removed
    pub min_occurrence_count: usize,
    /// Edges whose aggregated strength is below this are removed
    pub min_aggregated_strength: f64,
    /// Remove nodes left without any edge
    pub drop_orphans: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_occurrence_count: 1,
            min_aggregated_strength: 0.0,
            drop_orphans: false,
        }
    }
}

/// Constants of the final edge weight formula
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightingConfig {
    /// Share of the co-occurrence signal in the base weight (0..=1)
    pub cooccurrence_blend: f64,
    /// Co-occurrence count that maps to a normalised value of 0.5
    pub cooccurrence_half_saturation: f64,
    /// Multiplicative decay per hop away from the target (0 < base <= 1)
    pub distance_decay_base: f64,
    /// Age in days at which the recency factor halves
    pub recency_half_life_days: f64,
    /// Distance assumed for edges not connected to the target
    pub unreachable_distance: u32,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            cooccurrence_blend: 0.3,
            cooccurrence_half_saturation: 50.0,
            distance_decay_base: 0.85,
            recency_half_life_days: 180.0,
            unreachable_distance: 3,
        }
    }
}

/// Centrality iteration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-9,
            max_iterations: 100,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("GRAPHFACTORY_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("GRAPHFACTORY_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("graphfactory")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or use defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if !(0.0..=1.0).contains(&self.weighting.cooccurrence_blend) {
            return Err(anyhow!("weighting.cooccurrence_blend must be between 0.0 and 1.0"));
        }
        if self.weighting.cooccurrence_half_saturation <= 0.0 {
            return Err(anyhow!("weighting.cooccurrence_half_saturation must be positive"));
        }
        if !(self.weighting.distance_decay_base > 0.0 && self.weighting.distance_decay_base <= 1.0) {
            return Err(anyhow!("weighting.distance_decay_base must be in (0.0, 1.0]"));
        }
        if self.weighting.recency_half_life_days <= 0.0 {
            return Err(anyhow!("weighting.recency_half_life_days must be positive"));
        }
        if !(0.0..1.0).contains(&self.ranking.damping) {
            return Err(anyhow!("ranking.damping must be in [0.0, 1.0)"));
        }
        if !(0.0..=1.0).contains(&self.filter.min_aggregated_strength) {
            return Err(anyhow!("filter.min_aggregated_strength must be between 0.0 and 1.0"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // LLM settings
            "llm.base_url" => Ok(self.llm.base_url.clone()),
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            // Pipeline settings
            "pipeline.iteration_budget" => Ok(self.pipeline.iteration_budget.to_string()),
            "pipeline.top_n" => Ok(self.pipeline.top_n.to_string()),
            "pipeline.worker_pool_size" => Ok(self.pipeline.worker_pool_size.to_string()),
            "pipeline.searches_per_node" => Ok(self.pipeline.searches_per_node.to_string()),
            "pipeline.reexpand_nodes" => Ok(self.pipeline.reexpand_nodes.to_string()),
            "pipeline.deadline_secs" => Ok(self.pipeline.deadline_secs.to_string()),
            "pipeline.extraction_timeout_secs" => {
                Ok(self.pipeline.extraction_timeout_secs.to_string())
            }
            "pipeline.search_timeout_secs" => Ok(self.pipeline.search_timeout_secs.to_string()),
            "pipeline.stat_timeout_secs" => Ok(self.pipeline.stat_timeout_secs.to_string()),

            // Filter settings
            "filter.enabled" => Ok(self.filter.enabled.to_string()),
            "filter.min_occurrence_count" => Ok(self.filter.min_occurrence_count.to_string()),
            "filter.min_aggregated_strength" => {
                Ok(self.filter.min_aggregated_strength.to_string())
            }
            "filter.drop_orphans" => Ok(self.filter.drop_orphans.to_string()),

            // Weighting settings
            "weighting.cooccurrence_blend" => Ok(self.weighting.cooccurrence_blend.to_string()),
            "weighting.cooccurrence_half_saturation" => {
                Ok(self.weighting.cooccurrence_half_saturation.to_string())
            }
            "weighting.distance_decay_base" => Ok(self.weighting.distance_decay_base.to_string()),
            "weighting.recency_half_life_days" => {
                Ok(self.weighting.recency_half_life_days.to_string())
            }
            "weighting.unreachable_distance" => {
                Ok(self.weighting.unreachable_distance.to_string())
            }

            // Ranking settings
            "ranking.damping" => Ok(self.ranking.damping.to_string()),
            "ranking.tolerance" => Ok(self.ranking.tolerance.to_string()),
            "ranking.max_iterations" => Ok(self.ranking.max_iterations.to_string()),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use GRAPHFACTORY_API_KEY or OPENROUTER_API_KEY env var)"
                        .to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `graphfactory config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            // LLM settings
            "llm.base_url" => {
                self.llm.base_url = value.trim_end_matches('/').to_string();
            }
            "llm.default_model" => {
                self.llm.default_model = value.to_string();
            }
            "llm.fallback_models" => {
                self.llm.fallback_models = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => self.llm.max_tokens = parse_value(key, value)?,
            "llm.timeout_secs" => self.llm.timeout_secs = parse_value(key, value)?,

            // Pipeline settings
            "pipeline.iteration_budget" => {
                self.pipeline.iteration_budget = parse_value(key, value)?
            }
            "pipeline.top_n" => self.pipeline.top_n = parse_value(key, value)?,
            "pipeline.worker_pool_size" => {
                let size: usize = parse_value(key, value)?;
                if size == 0 {
                    return Err(anyhow!("Worker pool size must be at least 1"));
                }
                self.pipeline.worker_pool_size = size;
            }
            "pipeline.searches_per_node" => {
                self.pipeline.searches_per_node = parse_value(key, value)?
            }
            "pipeline.reexpand_nodes" => self.pipeline.reexpand_nodes = parse_value(key, value)?,
            "pipeline.deadline_secs" => self.pipeline.deadline_secs = parse_value(key, value)?,
            "pipeline.extraction_timeout_secs" => {
                self.pipeline.extraction_timeout_secs = parse_value(key, value)?
            }
            "pipeline.search_timeout_secs" => {
                self.pipeline.search_timeout_secs = parse_value(key, value)?
            }
            "pipeline.stat_timeout_secs" => {
                self.pipeline.stat_timeout_secs = parse_value(key, value)?
            }

            // Filter settings
            "filter.enabled" => self.filter.enabled = parse_value(key, value)?,
            "filter.min_occurrence_count" => {
                self.filter.min_occurrence_count = parse_value(key, value)?
            }
            "filter.min_aggregated_strength" => {
                self.filter.min_aggregated_strength = parse_value(key, value)?
            }
            "filter.drop_orphans" => self.filter.drop_orphans = parse_value(key, value)?,

            // Weighting settings
            "weighting.cooccurrence_blend" => {
                self.weighting.cooccurrence_blend = parse_value(key, value)?
            }
            "weighting.cooccurrence_half_saturation" => {
                self.weighting.cooccurrence_half_saturation = parse_value(key, value)?
            }
            "weighting.distance_decay_base" => {
                self.weighting.distance_decay_base = parse_value(key, value)?
            }
            "weighting.recency_half_life_days" => {
                self.weighting.recency_half_life_days = parse_value(key, value)?
            }
            "weighting.unreachable_distance" => {
                self.weighting.unreachable_distance = parse_value(key, value)?
            }

            // Ranking settings
            "ranking.damping" => self.ranking.damping = parse_value(key, value)?,
            "ranking.tolerance" => self.ranking.tolerance = parse_value(key, value)?,
            "ranking.max_iterations" => self.ranking.max_iterations = parse_value(key, value)?,

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the GRAPHFACTORY_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `graphfactory config list` to see available keys.",
                    key
                ));
            }
        }
        self.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "llm.base_url",
            "llm.default_model",
            "llm.fallback_models",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "pipeline.iteration_budget",
            "pipeline.top_n",
            "pipeline.worker_pool_size",
            "pipeline.searches_per_node",
            "pipeline.reexpand_nodes",
            "pipeline.deadline_secs",
            "pipeline.extraction_timeout_secs",
            "pipeline.search_timeout_secs",
            "pipeline.stat_timeout_secs",
            "filter.enabled",
            "filter.min_occurrence_count",
            "filter.min_aggregated_strength",
            "filter.drop_orphans",
            "weighting.cooccurrence_blend",
            "weighting.cooccurrence_half_saturation",
            "weighting.distance_decay_base",
            "weighting.recency_half_life_days",
            "weighting.unreachable_distance",
            "ranking.damping",
            "ranking.tolerance",
            "ranking.max_iterations",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.iteration_budget, 2);
        assert_eq!(config.pipeline.deadline(), None);
    }

    #[test]
    fn test_get_and_set_round_trip() {
        let mut config = Config::default();
        config.set("pipeline.top_n", "5").unwrap();
        config.set("filter.enabled", "true").unwrap();
        config.set("weighting.distance_decay_base", "0.5").unwrap();

        assert_eq!(config.get("pipeline.top_n").unwrap(), "5");
        assert_eq!(config.get("filter.enabled").unwrap(), "true");
        assert_eq!(config.get("weighting.distance_decay_base").unwrap(), "0.5");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("pipeline.worker_pool_size", "0").is_err());
        assert!(config.set("llm.temperature", "3.5").is_err());
        assert!(config.set("pipeline.top_n", "many").is_err());
        assert!(config.set("weighting.cooccurrence_blend", "1.5").is_err());
        assert!(config.set("llm.api_key", "sk-123").is_err());
        assert!(config.set("no.such.key", "1").is_err());
    }

    #[test]
    fn test_stored_api_key_is_rejected() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_in_config_file_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            api_key = "sk-or-stored"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-or-stored"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("environment variables"));
    }

    #[test]
    fn test_saved_config_never_contains_api_key() {
        let config = Config::default();
        let written = toml::to_string_pretty(&config).unwrap();
        assert!(!written.contains("api_key"));
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let items = config.list().unwrap();
        assert!(items.iter().any(|(k, _)| k == "pipeline.iteration_budget"));
        assert!(items.iter().any(|(k, _)| k == "ranking.damping"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            top_n = 3

            [edge_types]
            "vendor to" = "supplies"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.top_n, 3);
        assert_eq!(config.pipeline.iteration_budget, 2);
        assert_eq!(config.edge_types.get("vendor to").unwrap(), "supplies");
    }

    #[test]
    fn test_save_and_load_in_custom_dir() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: tests touching this variable run in a single test
        unsafe { env::set_var("GRAPHFACTORY_CONFIG_DIR", dir.path()) };

        let mut config = Config::default();
        config.pipeline.top_n = 7;
        config.save().unwrap();

        let loaded = Config::load().unwrap();
        assert_eq!(loaded.pipeline.top_n, 7);

        Config::reset().unwrap();
        assert!(!Config::config_path().unwrap().exists());
        unsafe { env::remove_var("GRAPHFACTORY_CONFIG_DIR") };
    }
}
