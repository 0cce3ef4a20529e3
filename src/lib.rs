//! ScanPanel - Multi-model consensus engine for medical imaging analysis.
//!
//! A panel of independent analyzers examines the same study; this crate
//! orchestrates them concurrently with failure isolation, reconciles
//! their possibly-conflicting findings into a consensus result with a
//! quantified agreement score, renders a report, and memoizes the
//! outcome.

pub mod analyzer;
pub mod cache;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod report;

pub use coordinator::{AnalysisCoordinator, CoordinatorContext};
pub use error::AnalysisError;
pub use models::{AnalysisRequest, ConsensusFinding, ConsensusResult, Finding, Severity};
