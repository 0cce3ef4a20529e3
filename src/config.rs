//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.scanpanel.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Consensus settings.
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Work queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Analyzer panel, in registration order.
    #[serde(default = "default_analyzers")]
    pub analyzers: Vec<AnalyzerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            analyzers: default_analyzers(),
        }
    }
}

/// Consensus engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum agreement ratio for a finding to reach consensus.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f64 {
    0.7
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-analyzer deadline in seconds.
    #[serde(default = "default_analyzer_timeout")]
    pub analyzer_timeout_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            analyzer_timeout_seconds: default_analyzer_timeout(),
        }
    }
}

fn default_analyzer_timeout() -> u64 {
    30
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached results in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    3600
}

/// Work queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued requests before submissions are rejected.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    32
}

/// Which backend implements an analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerBackend {
    /// Remote language model behind a chat API.
    Llm,
    /// Local deterministic reference-pattern analyzer.
    Reference,
}

/// One analyzer panel member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Stable source id; must be unique across the panel.
    pub id: String,

    /// Backend variant.
    pub backend: AnalyzerBackend,

    /// Chat API endpoint (llm backend only).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name (llm backend only).
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Sampling temperature (llm backend only).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds (llm backend only).
    #[serde(default = "default_analyzer_timeout")]
    pub timeout_seconds: u64,
}

impl AnalyzerConfig {
    /// An llm-backed analyzer with default endpoint settings.
    pub fn llm(id: &str) -> Self {
        Self {
            id: id.to_string(),
            backend: AnalyzerBackend::Llm,
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: None,
            temperature: default_temperature(),
            timeout_seconds: default_analyzer_timeout(),
        }
    }

    /// A local reference-pattern analyzer.
    pub fn reference(id: &str) -> Self {
        Self {
            backend: AnalyzerBackend::Reference,
            ..Self::llm(id)
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

/// The default three-member panel: two independent language models plus
/// the local reference analyzer.
fn default_analyzers() -> Vec<AnalyzerConfig> {
    vec![
        AnalyzerConfig {
            api_key_env: Some("SCANPANEL_INSIGHT_API_KEY".to_string()),
            ..AnalyzerConfig::llm("insight")
        },
        AnalyzerConfig {
            api_key_env: Some("SCANPANEL_CORTEX_API_KEY".to_string()),
            ..AnalyzerConfig::llm("cortex")
        },
        AnalyzerConfig::reference("reference"),
    ]
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".scanpanel.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence, but only when explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(threshold) = args.threshold {
            self.consensus.threshold = threshold;
        }
        if let Some(timeout) = args.timeout {
            self.orchestrator.analyzer_timeout_seconds = timeout;
        }
        if let Some(ttl) = args.cache_ttl {
            self.cache.ttl_seconds = ttl;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
