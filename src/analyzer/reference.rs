//! Local reference-pattern analyzer.
//!
//! Stands in for an on-box specialist model: no network, no credentials,
//! always produces its reference finding profile. Useful as a stable
//! member of the panel and as the built-in analyzer for demo runs.

use crate::analyzer::Analyzer;
use crate::models::{Artifact, Finding, Location, Metadata, Severity};
use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub struct ReferencePatternAnalyzer {
    source_id: String,
    display_name: String,
}

impl ReferencePatternAnalyzer {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            display_name: format!("{} (reference pattern)", source_id),
        }
    }
}

#[async_trait]
impl Analyzer for ReferencePatternAnalyzer {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn analyze(
        &self,
        _artifact: Option<&Artifact>,
        _metadata: &Metadata,
    ) -> Result<Vec<Finding>> {
        debug!("{} analyzing study...", self.display_name);

        Ok(vec![Finding::new(
            &self.source_id,
            "white_matter_lesion",
            Location::new(0.6, 0.4, 0.5),
            "Hyperintense signal in periventricular region on T2-weighted sequence",
            0.88,
            Severity::Mild,
            vec![
                "T2 hyperintensity".to_string(),
                "Size: 3-4mm".to_string(),
                "Periventricular location".to_string(),
            ],
        )])
    }
}
