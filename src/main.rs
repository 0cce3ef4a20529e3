//! ScanPanel - Multi-model consensus engine for medical imaging analysis
//!
//! A CLI front-end over the analysis pipeline: read one request, fan it
//! out to the configured analyzer panel, and write the consensus report.
//!
//! Exit codes:
//!   0 - Success (no findings above threshold, or no --fail-on set)
//!   1 - Runtime error (config, request parsing, pipeline failure)
//!   2 - Consensus findings found at or above --fail-on severity

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use scanpanel::cli::{Args, OutputFormat};
use scanpanel::config::Config;
use scanpanel::coordinator::AnalysisCoordinator;
use scanpanel::models::{AnalysisRequest, ConsensusResult, Severity};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("ScanPanel v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    // Run the analysis
    match run_analysis(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .scanpanel.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(".scanpanel.toml");

    if path.exists() {
        eprintln!("⚠️  .scanpanel.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .scanpanel.toml")?;

    println!("✅ Created .scanpanel.toml with default settings.");
    println!("   Edit it to customize the analyzer panel, threshold, and cache.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete analysis workflow. Returns exit code (0 or 2).
async fn run_analysis(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    // Step 1: Load the request
    let request = load_request(&args)?;
    info!("Loaded request for study {}", request.study_id);

    // Step 2: Build the coordinator
    let coordinator = AnalysisCoordinator::from_config(&config)?;

    println!("🩻 Analyzing study: {}", request.study_id);
    println!("   Panel:");
    for name in coordinator.analyzer_lineup() {
        println!("     🤖 {}", name);
    }
    println!("   Threshold: {}", config.consensus.threshold);
    println!("   Timeout: {}s per analyzer", config.orchestrator.analyzer_timeout_seconds);

    // Step 3: Run the pipeline
    let spinner = make_spinner(args.quiet);
    let result = coordinator.analyze(&request).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let result = result.map_err(anyhow::Error::from)?;

    // Step 4: Write the output
    let output = match args.format {
        OutputFormat::Report => result.report.clone(),
        OutputFormat::Json => serde_json::to_string_pretty(&result)?,
    };

    std::fs::write(&args.output, &output)
        .with_context(|| format!("Failed to write output to {}", args.output.display()))?;

    // Print summary
    print_summary(&result);
    println!(
        "\n✅ Analysis complete! Output saved to: {}",
        args.output.display()
    );

    // Check --fail-on threshold
    if let Some(fail_level) = args.fail_on {
        let threshold_severity = Severity::from(fail_level);
        let has_findings_above = result
            .findings
            .iter()
            .any(|f| f.severity >= threshold_severity);

        if has_findings_above {
            eprintln!(
                "\n⛔ Consensus findings at or above {:?} severity. Failing (exit code 2).",
                fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Print the analysis summary block.
fn print_summary(result: &ConsensusResult) {
    println!("\n📊 Analysis Summary:");
    println!("   Consensus findings: {}", result.findings.len());
    println!(
        "   Confidence score: {:.1}%",
        result.confidence_score * 100.0
    );
    println!("   Duration: {:.2}s", result.processing_time_seconds);

    for finding in &result.findings {
        println!(
            "   - {} [{}] ({:.0}% agreement)",
            finding.kind,
            finding.severity,
            finding.agreement_ratio * 100.0
        );
    }
    for rec in &result.recommendations {
        println!("   💡 {}", rec);
    }
}

/// Spinner shown while the panel is running (unless quiet).
fn make_spinner(quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("valid spinner template"),
    );
    spinner.set_message("Running analyzer panel...");
    spinner.enable_steady_tick(Duration::from_millis(120));
    Some(spinner)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from .scanpanel.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Load the analysis request (file or built-in demo).
fn load_request(args: &Args) -> Result<AnalysisRequest> {
    if args.demo {
        info!("Using built-in demo request");
        return Ok(demo_request());
    }

    let path = args
        .request
        .as_ref()
        .context("No request file provided (use --request or --demo)")?;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path.display()))?;
    let request: AnalysisRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request file: {}", path.display()))?;

    Ok(request)
}

/// Built-in demo request mirroring a routine brain MRI study.
fn demo_request() -> AnalysisRequest {
    let mut request = AnalysisRequest::new("DEMO-001");
    request
        .metadata
        .insert("modality".to_string(), "MRI".into());
    request
        .metadata
        .insert("sequences".to_string(), "T1, T2, FLAIR".into());
    request
        .metadata
        .insert("slice_thickness".to_string(), 3.0.into());
    request.user_context.insert(
        "clinical_question".to_string(),
        "Rule out structural abnormalities".into(),
    );
    request
        .user_context
        .insert("symptoms".to_string(), "Headache, dizziness".into());
    request
}
