//! Data models for the consensus engine.
//!
//! This module contains all the core data structures used throughout
//! the application for representing findings, requests, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Free-form metadata attached to a request, keyed deterministically.
pub type Metadata = BTreeMap<String, Value>;

/// Clinical severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No abnormality.
    Normal,
    /// Minor finding, usually of no clinical significance.
    Mild,
    /// Finding that warrants clinical correlation.
    Moderate,
    /// Finding that warrants urgent follow-up.
    Severe,
    /// Finding that warrants immediate attention.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Mild => write!(f, "mild"),
            Severity::Moderate => write!(f, "moderate"),
            Severity::Severe => write!(f, "severe"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl Severity {
    /// Parse a severity label leniently. Unknown labels map to `Mild`
    /// so a sloppy model response never drops a finding.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "normal" => Severity::Normal,
            "mild" => Severity::Mild,
            "moderate" => Severity::Moderate,
            "severe" => Severity::Severe,
            "critical" => Severity::Critical,
            _ => Severity::Mild,
        }
    }
}

/// Position within the artifact, normalized to `[0, 1]` per axis so it is
/// independent of acquisition resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x={:.2}, y={:.2}, z={:.2}", self.x, self.y, self.z)
    }
}

/// Process-wide sequence for finding ids. Ids are dedup bookkeeping only,
/// never persisted as a domain key.
static FINDING_SEQ: AtomicU64 = AtomicU64::new(0);

/// One analyzer's discrete observation about the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Opaque unique identifier, derived from source id + timestamp.
    pub id: String,
    /// Id of the analyzer that produced this finding.
    pub source_id: String,
    /// Classification tag (e.g. a lesion category).
    pub kind: String,
    /// Normalized position within the artifact.
    pub location: Location,
    /// Free-text narrative.
    pub description: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub severity: Severity,
    /// Supporting observations. Kept sorted and deduplicated.
    pub evidence: Vec<String>,
    /// Informational only.
    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Create a finding with a fresh id. Confidence is clamped to `[0, 1]`
    /// and evidence is normalized to set semantics.
    pub fn new(
        source_id: &str,
        kind: &str,
        location: Location,
        description: &str,
        confidence: f64,
        severity: Severity,
        evidence: Vec<String>,
    ) -> Self {
        let mut evidence = evidence;
        evidence.sort();
        evidence.dedup();

        Self {
            id: generate_finding_id(source_id),
            source_id: source_id.to_string(),
            kind: kind.to_string(),
            location,
            description: description.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            severity,
            evidence,
            created_at: Utc::now(),
        }
    }
}

/// Generate a finding id unique within the process.
fn generate_finding_id(source_id: &str) -> String {
    let seq = FINDING_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}-{:x}-{:04x}",
        source_id,
        Utc::now().timestamp_millis(),
        seq
    )
}

/// Opaque decoded artifact handed over by the ingestion layer.
///
/// Frames are sanitized payloads; this crate never inspects their contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub frames: Vec<String>,
}

/// A request to analyze one study. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Opaque study key. Must be non-empty.
    pub study_id: String,
    /// Decoded artifact, possibly absent.
    #[serde(default)]
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub user_context: Metadata,
    /// Advisory only; does not affect scheduling.
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_priority() -> String {
    "routine".to_string()
}

impl AnalysisRequest {
    /// Create a request with empty metadata and routine priority.
    pub fn new(study_id: &str) -> Self {
        Self {
            study_id: study_id.to_string(),
            artifact: None,
            metadata: Metadata::new(),
            user_context: Metadata::new(),
            priority: default_priority(),
        }
    }
}

/// A finding confirmed across a sufficient fraction of analyzers.
///
/// Derived by the consensus engine, never created independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusFinding {
    pub kind: String,
    /// From the highest-confidence contributor.
    pub location: Location,
    /// From the highest-confidence contributor.
    pub description: String,
    /// Arithmetic mean of contributing confidences.
    pub confidence: f64,
    /// From the highest-confidence contributor.
    pub severity: Severity,
    /// Union of contributing evidence, sorted.
    pub evidence: Vec<String>,
    /// Contributing-analyzer count divided by total analyzer count.
    pub agreement_ratio: f64,
    /// Source ids of the contributing analyzers, sorted.
    pub supporting_sources: Vec<String>,
}

/// Confidence score reported when no consensus finding exists.
pub const DEFAULT_CONFIDENCE: f64 = 0.85;

/// The reconciled outcome of one orchestration run. Immutable; the cache
/// may return a previously created instance unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub study_id: String,
    pub findings: Vec<ConsensusFinding>,
    /// Mean confidence across consensus findings, or [`DEFAULT_CONFIDENCE`]
    /// when none exist.
    pub confidence_score: f64,
    pub processing_time_seconds: f64,
    /// Pairwise agreement scores, one per unordered analyzer pair,
    /// keyed `"a_vs_b"` with the ids in lexicographic order.
    pub agent_agreements: BTreeMap<String, f64>,
    /// Rendered report text.
    pub report: String,
    pub recommendations: Vec<String>,
}
