//! Parallel analyzer orchestration.
//!
//! Fans one request out to every registered analyzer concurrently and
//! gathers the results into a complete mapping. Each invocation is
//! isolated: a fault, panic, or timeout in one analyzer yields an empty
//! finding list for that source and never aborts its siblings.

use crate::analyzer::AnalyzerRegistry;
use crate::models::{Artifact, Finding, Metadata};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-analyzer deadline.
pub const DEFAULT_ANALYZER_TIMEOUT: Duration = Duration::from_secs(30);

/// Fans requests out to the analyzer panel.
pub struct Orchestrator {
    registry: Arc<AnalyzerRegistry>,
    analyzer_timeout: Duration,
}

impl Orchestrator {
    pub fn new(registry: Arc<AnalyzerRegistry>, analyzer_timeout: Duration) -> Self {
        Self {
            registry,
            analyzer_timeout,
        }
    }

    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    /// Run every registered analyzer concurrently.
    ///
    /// Always returns a complete mapping: one entry per registered
    /// analyzer, empty when that analyzer failed or timed out. The map is
    /// keyed by source id, so downstream processing is independent of
    /// completion order.
    pub async fn run_all(
        &self,
        artifact: Option<&Artifact>,
        metadata: &Metadata,
    ) -> BTreeMap<String, Vec<Finding>> {
        debug!(
            "Dispatching to {} analyzers (timeout {}s each)",
            self.registry.len(),
            self.analyzer_timeout.as_secs()
        );

        let tasks: Vec<_> = self
            .registry
            .iter()
            .map(|analyzer| {
                let analyzer = Arc::clone(analyzer);
                let artifact = artifact.cloned();
                let metadata = metadata.clone();
                let timeout = self.analyzer_timeout;

                tokio::spawn(async move {
                    let source_id = analyzer.source_id().to_string();
                    let outcome =
                        tokio::time::timeout(timeout, analyzer.analyze(artifact.as_ref(), &metadata))
                            .await;

                    let findings = match outcome {
                        Ok(Ok(findings)) => findings,
                        Ok(Err(e)) => {
                            warn!("Analyzer {} failed: {}", source_id, e);
                            Vec::new()
                        }
                        Err(_) => {
                            warn!(
                                "Analyzer {} timed out after {}s",
                                source_id,
                                timeout.as_secs()
                            );
                            Vec::new()
                        }
                    };

                    (source_id, findings)
                })
            })
            .collect();

        // Seed with every registered id so the mapping stays complete even
        // if a task panics before reporting back.
        let mut all_findings: BTreeMap<String, Vec<Finding>> = self
            .registry
            .source_ids()
            .into_iter()
            .map(|id| (id, Vec::new()))
            .collect();

        for joined in join_all(tasks).await {
            match joined {
                Ok((source_id, findings)) => {
                    all_findings.insert(source_id, findings);
                }
                Err(e) => {
                    warn!("Analyzer task panicked: {}", e);
                }
            }
        }

        all_findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::models::{Location, Severity};
    use anyhow::Result;
    use async_trait::async_trait;

    struct FixedAnalyzer {
        id: String,
        findings: Vec<Finding>,
    }

    #[async_trait]
    impl Analyzer for FixedAnalyzer {
        fn source_id(&self) -> &str {
            &self.id
        }

        fn display_name(&self) -> &str {
            &self.id
        }

        async fn analyze(
            &self,
            _artifact: Option<&Artifact>,
            _metadata: &Metadata,
        ) -> Result<Vec<Finding>> {
            Ok(self.findings.clone())
        }
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl Analyzer for FailingAnalyzer {
        fn source_id(&self) -> &str {
            "broken"
        }

        fn display_name(&self) -> &str {
            "broken"
        }

        async fn analyze(
            &self,
            _artifact: Option<&Artifact>,
            _metadata: &Metadata,
        ) -> Result<Vec<Finding>> {
            anyhow::bail!("backend exploded")
        }
    }

    struct StalledAnalyzer;

    #[async_trait]
    impl Analyzer for StalledAnalyzer {
        fn source_id(&self) -> &str {
            "stalled"
        }

        fn display_name(&self) -> &str {
            "stalled"
        }

        async fn analyze(
            &self,
            _artifact: Option<&Artifact>,
            _metadata: &Metadata,
        ) -> Result<Vec<Finding>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    fn finding(source: &str) -> Finding {
        Finding::new(
            source,
            "white_matter_lesion",
            Location::new(0.6, 0.4, 0.5),
            "focus",
            0.8,
            Severity::Mild,
            vec![],
        )
    }

    fn registry_with(analyzers: Vec<Arc<dyn Analyzer>>) -> Arc<AnalyzerRegistry> {
        let mut registry = AnalyzerRegistry::new();
        for analyzer in analyzers {
            registry.register(analyzer);
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_run_all_complete_mapping() {
        let registry = registry_with(vec![
            Arc::new(FixedAnalyzer {
                id: "a".to_string(),
                findings: vec![finding("a")],
            }),
            Arc::new(FixedAnalyzer {
                id: "b".to_string(),
                findings: vec![finding("b")],
            }),
        ]);
        let orchestrator = Orchestrator::new(registry, DEFAULT_ANALYZER_TIMEOUT);

        let results = orchestrator.run_all(None, &Metadata::new()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["a"].len(), 1);
        assert_eq!(results["b"].len(), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_siblings() {
        let registry = registry_with(vec![
            Arc::new(FixedAnalyzer {
                id: "a".to_string(),
                findings: vec![finding("a")],
            }),
            Arc::new(FailingAnalyzer),
            Arc::new(FixedAnalyzer {
                id: "c".to_string(),
                findings: vec![finding("c")],
            }),
        ]);
        let orchestrator = Orchestrator::new(registry, DEFAULT_ANALYZER_TIMEOUT);

        let results = orchestrator.run_all(None, &Metadata::new()).await;

        // Still one entry per registered analyzer.
        assert_eq!(results.len(), 3);
        assert!(results["broken"].is_empty());
        assert_eq!(results["a"].len(), 1);
        assert_eq!(results["c"].len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_yields_empty_findings() {
        let registry = registry_with(vec![
            Arc::new(StalledAnalyzer),
            Arc::new(FixedAnalyzer {
                id: "quick".to_string(),
                findings: vec![finding("quick")],
            }),
        ]);
        let orchestrator = Orchestrator::new(registry, Duration::from_millis(50));

        let results = orchestrator.run_all(None, &Metadata::new()).await;
        assert_eq!(results.len(), 2);
        assert!(results["stalled"].is_empty());
        assert_eq!(results["quick"].len(), 1);
    }
}
