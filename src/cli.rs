//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::Severity;
use clap::Parser;
use std::path::PathBuf;

/// ScanPanel - Multi-model consensus engine for medical imaging analysis
///
/// Fan a study out to a panel of independent analyzers, reconcile their
/// findings into a consensus result, and render a report.
///
/// Examples:
///   scanpanel --request study.json
///   scanpanel --request study.json --threshold 0.6 --format json
///   scanpanel --demo
///   scanpanel --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to an analysis request file (JSON)
    ///
    /// The file holds one request object: study_id, optional artifact,
    /// metadata, user_context, priority.
    /// Not required when using --demo or --init-config.
    #[arg(short, long, value_name = "FILE", required_unless_present_any = ["demo", "init_config"])]
    pub request: Option<PathBuf>,

    /// Output file path for the rendered report
    #[arg(
        short,
        long,
        default_value = "analysis_report.txt",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Output format (report, json)
    ///
    /// report = the plain-text report; json = the full consensus result.
    #[arg(long, default_value = "report", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .scanpanel.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Consensus agreement threshold (0.0 - 1.0)
    ///
    /// Overrides the config file setting.
    #[arg(long, value_name = "RATIO", env = "SCANPANEL_THRESHOLD")]
    pub threshold: Option<f64>,

    /// Per-analyzer timeout in seconds
    ///
    /// Overrides the config file setting.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Cache time-to-live in seconds
    ///
    /// Overrides the config file setting.
    #[arg(long, value_name = "SECS")]
    pub cache_ttl: Option<u64>,

    /// Fail if consensus findings at or above this severity are found
    ///
    /// Useful for triage pipelines. Exit code 2 when the threshold is met.
    /// Values: mild, moderate, severe, critical
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Run the built-in demo request instead of reading a request file
    #[arg(long)]
    pub demo: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .scanpanel.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the analysis result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain-text report (default)
    #[default]
    Report,
    /// Full consensus result as JSON
    Json,
}

/// Severity level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl From<FailOnLevel> for Severity {
    fn from(level: FailOnLevel) -> Self {
        match level {
            FailOnLevel::Mild => Severity::Mild,
            FailOnLevel::Moderate => Severity::Moderate,
            FailOnLevel::Severe => Severity::Severe,
            FailOnLevel::Critical => Severity::Critical,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("Threshold must be between 0.0 and 1.0".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref request_path) = self.request {
            if !request_path.exists() {
                return Err(format!(
                    "Request file does not exist: {}",
                    request_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
