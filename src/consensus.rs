//! Consensus over multi-analyzer findings.
//!
//! Groups raw findings by similarity, keeps the groups a sufficient
//! fraction of the panel agrees on, and merges each surviving group into
//! a single consensus finding. The result is a pure function of the
//! finding multiset: iteration always follows the source-id order of the
//! complete mapping, never completion order.

use crate::models::{ConsensusFinding, Finding};
use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Default agreement threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Decides whether two findings describe the same observation.
///
/// The default matches on `kind` alone; location proximity is not
/// evaluated. A spatial metric can be substituted here without touching
/// the grouping algorithm.
pub trait SimilarityPredicate: Send + Sync {
    fn similar(&self, a: &Finding, b: &Finding) -> bool;
}

/// Two findings are similar iff their `kind` fields are equal.
pub struct KindMatch;

impl SimilarityPredicate for KindMatch {
    fn similar(&self, a: &Finding, b: &Finding) -> bool {
        a.kind == b.kind
    }
}

/// Combines findings from multiple analyzers into consensus findings.
pub struct ConsensusEngine {
    threshold: f64,
    predicate: Box<dyn SimilarityPredicate>,
}

impl ConsensusEngine {
    /// Create an engine with the default kind-equality predicate.
    ///
    /// A threshold outside `[0, 1]` is a caller contract violation and is
    /// rejected here, at the boundary.
    pub fn new(threshold: f64) -> Result<Self> {
        Self::with_predicate(threshold, Box::new(KindMatch))
    }

    /// Create an engine with a custom similarity strategy.
    pub fn with_predicate(
        threshold: f64,
        predicate: Box<dyn SimilarityPredicate>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            bail!("consensus threshold must be within [0, 1], got {threshold}");
        }
        Ok(Self {
            threshold,
            predicate,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compute consensus findings from the complete per-analyzer mapping.
    ///
    /// Empty input yields empty output. Groups whose agreement ratio falls
    /// below the threshold are dropped; they remain visible only through
    /// [`ConsensusEngine::pairwise_agreements`].
    pub fn consensus(
        &self,
        all_findings: &BTreeMap<String, Vec<Finding>>,
    ) -> Vec<ConsensusFinding> {
        let total_analyzers = all_findings.len();
        if total_analyzers == 0 {
            return Vec::new();
        }

        let groups = self.group_similar(all_findings);

        let mut consensus = Vec::new();
        for group in &groups {
            let sources: BTreeSet<&str> =
                group.iter().map(|f| f.source_id.as_str()).collect();
            let agreement_ratio = sources.len() as f64 / total_analyzers as f64;

            if agreement_ratio >= self.threshold {
                consensus.push(merge_group(group, agreement_ratio));
            }
        }

        debug!(
            "Consensus reached on {} of {} groups",
            consensus.len(),
            groups.len()
        );
        consensus
    }

    /// Greedy single-pass grouping in source-iteration order.
    ///
    /// Each not-yet-grouped finding seeds a new group; every remaining
    /// finding from a *different* source joins the first compatible group
    /// it is scanned for. No backtracking.
    fn group_similar<'a>(
        &self,
        all_findings: &'a BTreeMap<String, Vec<Finding>>,
    ) -> Vec<Vec<&'a Finding>> {
        let flattened: Vec<&Finding> =
            all_findings.values().flat_map(|findings| findings.iter()).collect();

        let mut grouped = vec![false; flattened.len()];
        let mut groups = Vec::new();

        for seed_idx in 0..flattened.len() {
            if grouped[seed_idx] {
                continue;
            }
            let seed = flattened[seed_idx];
            grouped[seed_idx] = true;
            let mut group = vec![seed];

            for other_idx in 0..flattened.len() {
                if grouped[other_idx] {
                    continue;
                }
                let other = flattened[other_idx];
                if other.source_id == seed.source_id {
                    continue;
                }
                if self.predicate.similar(seed, other) {
                    grouped[other_idx] = true;
                    group.push(other);
                }
            }

            groups.push(group);
        }

        groups
    }

    /// Pairwise agreement per unordered analyzer pair.
    ///
    /// Scored as Jaccard similarity over each pair's finding-kind sets;
    /// two analyzers that both reported nothing count as full agreement.
    /// Keys are `"a_vs_b"` with the ids in lexicographic order.
    pub fn pairwise_agreements(
        &self,
        all_findings: &BTreeMap<String, Vec<Finding>>,
    ) -> BTreeMap<String, f64> {
        let kind_sets: Vec<(&String, BTreeSet<&str>)> = all_findings
            .iter()
            .map(|(id, findings)| {
                (id, findings.iter().map(|f| f.kind.as_str()).collect())
            })
            .collect();

        let mut agreements = BTreeMap::new();
        for (i, (id_a, kinds_a)) in kind_sets.iter().enumerate() {
            for (id_b, kinds_b) in kind_sets.iter().skip(i + 1) {
                let union = kinds_a.union(kinds_b).count();
                let score = if union == 0 {
                    1.0
                } else {
                    kinds_a.intersection(kinds_b).count() as f64 / union as f64
                };
                agreements.insert(format!("{}_vs_{}", id_a, id_b), score);
            }
        }

        agreements
    }
}

/// Merge a group into one consensus finding.
///
/// Confidence is the arithmetic mean over the group; description,
/// severity, and location come from the single highest-confidence member
/// (first wins on ties); evidence is the sorted union.
fn merge_group(group: &[&Finding], agreement_ratio: f64) -> ConsensusFinding {
    let mean_confidence =
        group.iter().map(|f| f.confidence).sum::<f64>() / group.len() as f64;

    let mut best = group[0];
    for finding in &group[1..] {
        if finding.confidence > best.confidence {
            best = finding;
        }
    }

    let evidence: BTreeSet<&str> = group
        .iter()
        .flat_map(|f| f.evidence.iter().map(String::as_str))
        .collect();
    let sources: Vec<String> = group
        .iter()
        .map(|f| f.source_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    ConsensusFinding {
        kind: best.kind.clone(),
        location: best.location,
        description: best.description.clone(),
        confidence: mean_confidence,
        severity: best.severity,
        evidence: evidence.into_iter().map(String::from).collect(),
        agreement_ratio,
        supporting_sources: sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, Severity};

    fn finding(source: &str, kind: &str, confidence: f64) -> Finding {
        Finding::new(
            source,
            kind,
            Location::new(0.6, 0.4, 0.5),
            &format!("{kind} reported by {source}"),
            confidence,
            Severity::Mild,
            vec![format!("{source} evidence")],
        )
    }

    fn mapping(entries: Vec<(&str, Vec<Finding>)>) -> BTreeMap<String, Vec<Finding>> {
        entries
            .into_iter()
            .map(|(id, findings)| (id.to_string(), findings))
            .collect()
    }

    #[test]
    fn test_threshold_bounds_rejected() {
        assert!(ConsensusEngine::new(-0.1).is_err());
        assert!(ConsensusEngine::new(1.1).is_err());
        assert!(ConsensusEngine::new(0.0).is_ok());
        assert!(ConsensusEngine::new(1.0).is_ok());
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let engine = ConsensusEngine::new(DEFAULT_THRESHOLD).unwrap();
        assert!(engine.consensus(&BTreeMap::new()).is_empty());

        let empty = mapping(vec![("a", vec![]), ("b", vec![])]);
        assert!(engine.consensus(&empty).is_empty());
    }

    #[test]
    fn test_full_agreement_merge() {
        let engine = ConsensusEngine::new(DEFAULT_THRESHOLD).unwrap();
        let all = mapping(vec![
            ("a", vec![finding("a", "white_matter_lesion", 0.85)]),
            ("b", vec![finding("b", "white_matter_lesion", 0.82)]),
            ("c", vec![finding("c", "white_matter_lesion", 0.88)]),
        ]);

        let consensus = engine.consensus(&all);
        assert_eq!(consensus.len(), 1);

        let merged = &consensus[0];
        assert!((merged.confidence - 0.85).abs() < 1e-9);
        assert_eq!(merged.agreement_ratio, 1.0);
        // Highest-confidence contributor supplies the narrative fields.
        assert_eq!(merged.description, "white_matter_lesion reported by c");
        assert_eq!(merged.supporting_sources, vec!["a", "b", "c"]);
        // Evidence is the sorted union.
        assert_eq!(
            merged.evidence,
            vec!["a evidence", "b evidence", "c evidence"]
        );
    }

    #[test]
    fn test_threshold_excludes_partial_agreement() {
        let engine = ConsensusEngine::new(DEFAULT_THRESHOLD).unwrap();
        // 2 of 3 analyzers report the nodule: 0.667 < 0.7.
        let all = mapping(vec![
            ("a", vec![finding("a", "nodule", 0.9)]),
            ("b", vec![finding("b", "nodule", 0.6)]),
            ("c", vec![]),
        ]);

        assert!(engine.consensus(&all).is_empty());
    }

    #[test]
    fn test_agreement_ratio_counts_sources_not_findings() {
        let engine = ConsensusEngine::new(0.5).unwrap();
        // Source b reports the same kind twice; ratio must still be 2/2.
        let all = mapping(vec![
            ("a", vec![finding("a", "nodule", 0.9)]),
            (
                "b",
                vec![finding("b", "nodule", 0.7), finding("b", "nodule", 0.6)],
            ),
        ]);

        let consensus = engine.consensus(&all);
        assert_eq!(consensus.len(), 1);
        assert_eq!(consensus[0].agreement_ratio, 1.0);
        assert_eq!(consensus[0].supporting_sources, vec!["a", "b"]);
    }

    #[test]
    fn test_finding_joins_at_most_one_group() {
        let engine = ConsensusEngine::new(0.0).unwrap();
        let all = mapping(vec![
            ("a", vec![finding("a", "nodule", 0.9)]),
            ("b", vec![finding("b", "nodule", 0.8)]),
            ("c", vec![finding("c", "nodule", 0.7)]),
        ]);

        // One group absorbs all three; no finding seeds a second group.
        let consensus = engine.consensus(&all);
        assert_eq!(consensus.len(), 1);
    }

    #[test]
    fn test_consensus_independent_of_arrival_order() {
        let engine = ConsensusEngine::new(DEFAULT_THRESHOLD).unwrap();
        let forward = mapping(vec![
            ("a", vec![finding("a", "white_matter_lesion", 0.85)]),
            ("b", vec![finding("b", "white_matter_lesion", 0.82)]),
        ]);
        // Same multiset, inserted in the opposite order.
        let reversed = mapping(vec![
            ("b", vec![finding("b", "white_matter_lesion", 0.82)]),
            ("a", vec![finding("a", "white_matter_lesion", 0.85)]),
        ]);

        let x = engine.consensus(&forward);
        let y = engine.consensus(&reversed);
        assert_eq!(x.len(), y.len());
        assert_eq!(x[0].description, y[0].description);
        assert_eq!(x[0].supporting_sources, y[0].supporting_sources);
    }

    #[test]
    fn test_custom_predicate_replaces_grouping_rule() {
        struct NeverSimilar;
        impl SimilarityPredicate for NeverSimilar {
            fn similar(&self, _a: &Finding, _b: &Finding) -> bool {
                false
            }
        }

        let engine =
            ConsensusEngine::with_predicate(DEFAULT_THRESHOLD, Box::new(NeverSimilar)).unwrap();
        let all = mapping(vec![
            ("a", vec![finding("a", "nodule", 0.9)]),
            ("b", vec![finding("b", "nodule", 0.8)]),
            ("c", vec![finding("c", "nodule", 0.7)]),
        ]);

        // Every finding stays a singleton group: 1/3 < 0.7, nothing survives.
        assert!(engine.consensus(&all).is_empty());
    }

    #[test]
    fn test_pairwise_agreements() {
        let engine = ConsensusEngine::new(DEFAULT_THRESHOLD).unwrap();
        let all = mapping(vec![
            (
                "a",
                vec![finding("a", "nodule", 0.9), finding("a", "lesion", 0.8)],
            ),
            ("b", vec![finding("b", "nodule", 0.7)]),
            ("c", vec![]),
        ]);

        let agreements = engine.pairwise_agreements(&all);
        assert_eq!(agreements.len(), 3);
        // {nodule, lesion} vs {nodule}: 1 shared of 2 total kinds.
        assert_eq!(agreements["a_vs_b"], 0.5);
        // {nodule, lesion} vs {}: nothing shared.
        assert_eq!(agreements["a_vs_c"], 0.0);
        // {nodule} vs {}: nothing shared.
        assert_eq!(agreements["b_vs_c"], 0.0);
    }

    #[test]
    fn test_pairwise_agreement_of_two_silent_analyzers() {
        let engine = ConsensusEngine::new(DEFAULT_THRESHOLD).unwrap();
        let all = mapping(vec![("a", vec![]), ("b", vec![])]);

        let agreements = engine.pairwise_agreements(&all);
        assert_eq!(agreements["a_vs_b"], 1.0);
    }
}
