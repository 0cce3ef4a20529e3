//! Top-level analysis coordination.
//!
//! One call walks the pipeline: cache check, orchestrated analysis,
//! consensus, report, cache store. Analyzer and cache faults are absorbed
//! below this layer; the only faults a caller sees are a malformed
//! request or a total pipeline failure. Nothing is retried internally and
//! nothing partial is ever cached or returned.

use crate::analyzer::AnalyzerRegistry;
use crate::cache::{ResultCache, ResultStore, SingleFlight};
use crate::config::Config;
use crate::consensus::ConsensusEngine;
use crate::error::AnalysisError;
use crate::models::{AnalysisRequest, ConsensusResult, DEFAULT_CONFIDENCE};
use crate::orchestrator::Orchestrator;
use crate::report;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything the coordinator needs, passed in explicitly so tests can
/// substitute any seam (analyzers, similarity predicate, store).
pub struct CoordinatorContext {
    pub registry: Arc<AnalyzerRegistry>,
    pub engine: ConsensusEngine,
    pub store: Arc<dyn ResultStore>,
    pub cache_ttl: Duration,
    pub analyzer_timeout: Duration,
}

/// Composes orchestration, consensus, reporting, and caching.
pub struct AnalysisCoordinator {
    orchestrator: Orchestrator,
    engine: ConsensusEngine,
    cache: ResultCache,
    flights: SingleFlight,
}

impl AnalysisCoordinator {
    pub fn new(context: CoordinatorContext) -> Self {
        Self {
            orchestrator: Orchestrator::new(context.registry, context.analyzer_timeout),
            engine: context.engine,
            cache: ResultCache::new(context.store, context.cache_ttl),
            flights: SingleFlight::new(),
        }
    }

    /// Build a coordinator from configuration, with the in-memory store.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = AnalyzerRegistry::from_config(&config.analyzers)?;
        let engine = ConsensusEngine::new(config.consensus.threshold)?;

        Ok(Self::new(CoordinatorContext {
            registry: Arc::new(registry),
            engine,
            store: Arc::new(crate::cache::MemoryStore::new()),
            cache_ttl: Duration::from_secs(config.cache.ttl_seconds),
            analyzer_timeout: Duration::from_secs(config.orchestrator.analyzer_timeout_seconds),
        }))
    }

    pub fn analyzer_lineup(&self) -> Vec<String> {
        self.orchestrator
            .registry()
            .iter()
            .map(|a| a.display_name().to_string())
            .collect()
    }

    /// Run the full analysis pipeline for one request.
    ///
    /// Concurrent calls for the same study are single-flighted: the
    /// second caller waits for the first and then returns its cached
    /// result instead of repeating the orchestration.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<ConsensusResult, AnalysisError> {
        let study_id = request.study_id.trim();
        if study_id.is_empty() {
            return Err(AnalysisError::MalformedRequest(
                "study_id must be non-empty".to_string(),
            ));
        }

        let _flight = self.flights.acquire(study_id).await;

        if let Some(cached) = self.cache.get(study_id).await {
            info!("Returning cached result for study {}", study_id);
            return Ok(cached);
        }

        info!("Starting analysis for study {}", study_id);
        let start = Instant::now();

        let all_findings = self
            .orchestrator
            .run_all(request.artifact.as_ref(), &request.metadata)
            .await;
        debug!(
            "Collected {} raw findings from {} analyzers",
            all_findings.values().map(Vec::len).sum::<usize>(),
            all_findings.len()
        );

        let findings = self.engine.consensus(&all_findings);
        let agent_agreements = self.engine.pairwise_agreements(&all_findings);

        let (report, recommendations) = report::render(&findings, &request.metadata);

        let confidence_score = if findings.is_empty() {
            DEFAULT_CONFIDENCE
        } else {
            findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64
        };

        let result = ConsensusResult {
            study_id: study_id.to_string(),
            findings,
            confidence_score,
            processing_time_seconds: start.elapsed().as_secs_f64(),
            agent_agreements,
            report,
            recommendations,
        };

        self.cache.put(&result).await;

        info!(
            "Analysis complete for study {} in {:.2}s ({} consensus findings)",
            study_id,
            result.processing_time_seconds,
            result.findings.len()
        );
        Ok(result)
    }

    /// Look up a previously computed result.
    pub async fn get_result(&self, study_id: &str) -> Option<ConsensusResult> {
        self.cache.get(study_id).await
    }

    /// Look up the rendered report for a previously computed result.
    pub async fn get_report(&self, study_id: &str) -> Result<String, AnalysisError> {
        self.cache
            .get(study_id)
            .await
            .map(|result| result.report)
            .ok_or_else(|| AnalysisError::NotFound(study_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::cache::MemoryStore;
    use crate::models::{Artifact, Finding, Location, Metadata, Severity};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Analyzer that always reports the same lesion and counts its calls.
    struct CountingAnalyzer {
        id: String,
        confidence: f64,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Finding::new(
                &self.id,
                "white_matter_lesion",
                Location::new(0.6, 0.4, 0.5),
                "Periventricular hyperintense focus",
                self.confidence,
                Severity::Mild,
                vec!["T2 hyperintensity".to_string()],
            )])
        }
    }

    struct FaultyAnalyzer;

    #[async_trait]
    impl Analyzer for FaultyAnalyzer {
        fn source_id(&self) -> &str {
            "faulty"
        }

        fn display_name(&self) -> &str {
            "faulty"
        }

        async fn analyze(
            &self,
            _artifact: Option<&Artifact>,
            _metadata: &Metadata,
        ) -> Result<Vec<Finding>> {
            anyhow::bail!("model backend down")
        }
    }

    fn coordinator_with(
        analyzers: Vec<Arc<dyn Analyzer>>,
        threshold: f64,
    ) -> AnalysisCoordinator {
        let mut registry = AnalyzerRegistry::new();
        for analyzer in analyzers {
            registry.register(analyzer);
        }
        AnalysisCoordinator::new(CoordinatorContext {
            registry: Arc::new(registry),
            engine: ConsensusEngine::new(threshold).unwrap(),
            store: Arc::new(MemoryStore::new()),
            cache_ttl: Duration::from_secs(3600),
            analyzer_timeout: Duration::from_secs(30),
        })
    }

    fn counting(id: &str, confidence: f64, calls: &Arc<AtomicUsize>) -> Arc<dyn Analyzer> {
        Arc::new(CountingAnalyzer {
            id: id.to_string(),
            confidence,
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator_with(
            vec![
                counting("a", 0.85, &calls),
                counting("b", 0.82, &calls),
                counting("c", 0.88, &calls),
            ],
            0.7,
        );

        let result = coordinator
            .analyze(&AnalysisRequest::new("STUDY-001"))
            .await
            .unwrap();

        assert_eq!(result.study_id, "STUDY-001");
        assert_eq!(result.findings.len(), 1);
        assert!((result.findings[0].confidence - 0.85).abs() < 1e-9);
        assert_eq!(result.findings[0].agreement_ratio, 1.0);
        assert!((0.0..=1.0).contains(&result.confidence_score));
        // One entry per unordered analyzer pair.
        assert_eq!(result.agent_agreements.len(), 3);
        assert!(result.report.contains("RADIOLOGY REPORT"));
        assert_eq!(result.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator_with(vec![counting("a", 0.9, &calls)], 0.7);

        let err = coordinator
            .analyze(&AnalysisRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedRequest(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_faulty_analyzer_does_not_fail_analysis() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator_with(
            vec![
                counting("a", 0.85, &calls),
                counting("b", 0.82, &calls),
                Arc::new(FaultyAnalyzer),
            ],
            0.6,
        );

        let result = coordinator
            .analyze(&AnalysisRequest::new("STUDY-002"))
            .await
            .unwrap();

        // 2 of 3 agree: 0.667 >= 0.6, so the finding survives.
        assert_eq!(result.findings.len(), 1);
        assert_eq!(
            result.findings[0].supporting_sources,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_call_is_byte_identical_cache_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator_with(
            vec![counting("a", 0.85, &calls), counting("b", 0.82, &calls)],
            0.7,
        );

        let request = AnalysisRequest::new("STUDY-003");
        let first = coordinator.analyze(&request).await.unwrap();
        let second = coordinator.analyze(&request).await.unwrap();

        // Each analyzer ran exactly once.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_concurrent_same_study_single_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = Arc::new(coordinator_with(
            vec![counting("a", 0.85, &calls), counting("b", 0.82, &calls)],
            0.7,
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator
                    .analyze(&AnalysisRequest::new("STUDY-004"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Four concurrent requests, one orchestration run.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_result_and_report_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator_with(
            vec![counting("a", 0.85, &calls), counting("b", 0.82, &calls)],
            0.7,
        );

        assert!(coordinator.get_result("STUDY-005").await.is_none());
        assert!(matches!(
            coordinator.get_report("STUDY-005").await,
            Err(AnalysisError::NotFound(_))
        ));

        coordinator
            .analyze(&AnalysisRequest::new("STUDY-005"))
            .await
            .unwrap();

        let stored = coordinator.get_result("STUDY-005").await.unwrap();
        assert_eq!(stored.study_id, "STUDY-005");
        let report = coordinator.get_report("STUDY-005").await.unwrap();
        assert!(report.contains("RADIOLOGY REPORT"));
    }
}
