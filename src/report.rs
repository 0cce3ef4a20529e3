//! Report generation.
//!
//! Renders consensus findings and request metadata into the fixed-form
//! report text and the recommendation list. Everything here is a pure
//! function of its inputs; downstream consumers parse the report layout,
//! so the structure is a compatibility contract.

use crate::models::{ConsensusFinding, Metadata, Severity, DEFAULT_CONFIDENCE};
use serde_json::Value;

/// Render the report text and recommendations for a set of consensus
/// findings. Deterministic: identical inputs produce identical bytes.
pub fn render(findings: &[ConsensusFinding], metadata: &Metadata) -> (String, Vec<String>) {
    let recommendations = generate_recommendations(findings);

    let mut report = String::new();
    report.push_str("RADIOLOGY REPORT\n");
    report.push_str("Generated by ScanPanel Multi-Model Consensus System\n\n");

    report.push_str("TECHNIQUE:\n");
    report.push_str("MRI examination performed with standard protocols.\n");
    report.push_str(&format!("Modality: {}\n", metadata_str(metadata, "modality", "MRI")));
    report.push_str(&format!(
        "Sequences obtained: {}\n\n",
        metadata_str(metadata, "sequences", "T1, T2, FLAIR")
    ));

    report.push_str("COMPARISON:\n");
    report.push_str("No prior studies available for comparison.\n\n");

    report.push_str("FINDINGS:\n");
    if findings.is_empty() {
        report.push_str("\nNo significant abnormalities identified.\n");
    } else {
        for (i, finding) in findings.iter().enumerate() {
            report.push_str(&format!("\n{}. {}\n", i + 1, finding.description));
            report.push_str(&format!("   - Location: {}\n", finding.location));
            report.push_str(&format!("   - Severity: {}\n", finding.severity));
            report.push_str(&format!(
                "   - Confidence: {}\n",
                percent(finding.confidence)
            ));
            report.push_str(&format!(
                "   - Supporting evidence: {}\n",
                finding.evidence.join(", ")
            ));
        }
    }

    report.push_str("\nIMPRESSION:\n");
    report.push_str(&generate_impression(findings));
    report.push('\n');

    report.push_str("\nRECOMMENDATIONS:\n");
    for (i, rec) in recommendations.iter().enumerate() {
        report.push_str(&format!("{}. {}\n", i + 1, rec));
    }

    report.push_str(&format!(
        "\nConfidence score: {}\n",
        percent(mean_confidence(findings))
    ));

    (report, recommendations)
}

/// Clinical recommendation policy.
///
/// Severe and critical findings get an urgent follow-up line, moderate
/// findings a clinical-correlation line; with no qualifying finding the
/// list is exactly one routine default.
pub fn generate_recommendations(findings: &[ConsensusFinding]) -> Vec<String> {
    let mut recommendations = Vec::new();

    for finding in findings {
        if finding.severity >= Severity::Severe {
            recommendations.push(format!(
                "Urgent follow-up recommended for {}",
                finding.kind
            ));
        } else if finding.severity == Severity::Moderate {
            recommendations.push(format!(
                "Clinical correlation suggested for {}",
                finding.kind
            ));
        }
    }

    if recommendations.is_empty() {
        recommendations
            .push("No urgent findings. Routine follow-up as clinically indicated.".to_string());
    }

    recommendations
}

/// Impression covers moderate-and-above findings only.
fn generate_impression(findings: &[ConsensusFinding]) -> String {
    if findings.is_empty() {
        return "No acute intracranial abnormality identified.".to_string();
    }

    let notable: Vec<String> = findings
        .iter()
        .filter(|f| f.severity >= Severity::Moderate)
        .map(|f| format!("{} ({})", f.description, f.severity))
        .collect();

    if notable.is_empty() {
        "Minor findings as described above, likely of no clinical significance.".to_string()
    } else {
        notable.join("\n")
    }
}

fn mean_confidence(findings: &[ConsensusFinding]) -> f64 {
    if findings.is_empty() {
        DEFAULT_CONFIDENCE
    } else {
        findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64
    }
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &str, default: &'a str) -> &'a str {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
