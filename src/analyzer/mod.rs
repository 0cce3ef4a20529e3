//! Analyzer capability boundary.
//!
//! Every analyzer implements one contract: take an artifact plus metadata,
//! return findings. Concrete variants are registered at startup from
//! configuration; nothing downstream knows which backend produced a
//! finding beyond its source id.

pub mod llm;
pub mod reference;

pub use llm::LanguageModelAnalyzer;
pub use reference::ReferencePatternAnalyzer;

use crate::config::{AnalyzerBackend, AnalyzerConfig};
use crate::models::{Artifact, Finding, Metadata};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// An independent capability producing findings from one artifact.
///
/// Implementations must not panic across this boundary and must not retry
/// backend calls on their own; the backends are rate-limited and the calls
/// are not idempotent.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Stable identifier used to key this analyzer's findings.
    fn source_id(&self) -> &str;

    /// Human-readable name for logs and status output.
    fn display_name(&self) -> &str;

    /// Analyze the artifact and return findings.
    ///
    /// An `Err` here is recovered by the orchestrator as an empty finding
    /// list; implementations that can degrade gracefully (e.g. to a
    /// placeholder set) should prefer that over returning an error.
    async fn analyze(&self, artifact: Option<&Artifact>, metadata: &Metadata)
        -> Result<Vec<Finding>>;
}

/// Ordered set of registered analyzers.
///
/// Registration order is the stable iteration order used by the
/// orchestrator and the consensus grouping tie-break.
#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration entries.
    ///
    /// Rejects duplicate source ids and an empty lineup.
    pub fn from_config(configs: &[AnalyzerConfig]) -> Result<Self> {
        if configs.is_empty() {
            bail!("no analyzers configured");
        }

        let mut seen = HashSet::new();
        let mut registry = Self::new();
        for config in configs {
            if !seen.insert(config.id.clone()) {
                bail!("duplicate analyzer id: {}", config.id);
            }
            let analyzer: Arc<dyn Analyzer> = match config.backend {
                AnalyzerBackend::Llm => Arc::new(LanguageModelAnalyzer::new(config)),
                AnalyzerBackend::Reference => {
                    Arc::new(ReferencePatternAnalyzer::new(&config.id))
                }
            };
            registry.register(analyzer);
        }
        Ok(registry)
    }

    /// Register an analyzer. Later registrations keep their relative order.
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.push(analyzer);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Analyzer>> {
        self.analyzers.iter()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Source ids in registration order.
    pub fn source_ids(&self) -> Vec<String> {
        self.analyzers
            .iter()
            .map(|a| a.source_id().to_string())
            .collect()
    }
}
