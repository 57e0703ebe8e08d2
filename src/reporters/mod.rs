//! Output reporters for armvet results
//!
//! Supports two output formats:
//! - `text` - Terminal output with colors
//! - `json` - Machine-readable JSON

mod json;
mod text;

use crate::fixes::OptimizationResult;
use crate::models::ValidationReport;
use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" | "terminal" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow!("Unknown format '{}'. Valid formats: text, json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render a validation report
pub fn render_report(report: &ValidationReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => text::render(report),
        OutputFormat::Json => json::render(report),
    }
}

/// Render several validation reports
pub fn render_reports(reports: &[ValidationReport], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            for report in reports {
                out.push_str(&text::render(report)?);
            }
            Ok(out)
        }
        OutputFormat::Json => json::render(&reports),
    }
}

/// Render an optimization result
pub fn render_optimization(result: &OptimizationResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => text::render_optimization(result),
        OutputFormat::Json => json::render(result),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        ArtifactKind, Dimension, DimensionScore, Finding, FindingsSummary, Severity,
        SourceLocation, ToolRun, ToolRunStatus, ValidationTarget,
    };

    /// A small failing report
    pub(crate) fn test_report() -> ValidationReport {
        let findings = vec![
            Finding::new(
                "storage-https-only-missing",
                "builtin",
                Severity::Error,
                Dimension::Security,
                "Microsoft.Storage/storageAccounts 'data' does not enforce HTTPS-only traffic",
            )
            .with_remediation("Set properties.supportsHttpsTrafficOnly to true")
            .with_location(
                SourceLocation::file("mainTemplate.json")
                    .with_pointer("/resources/0")
                    .with_line(Some(12)),
            ),
            Finding::new(
                "tool-timed-out",
                "arm-ttk",
                Severity::Error,
                Dimension::Compliance,
                "arm-ttk timed out after 2 attempts (120000 ms each)",
            ),
        ];
        ValidationReport {
            run_id: "00000000-0000-4000-8000-000000000000".into(),
            generated_at: chrono::Utc::now(),
            target: ValidationTarget {
                path: "/pkg/mainTemplate.json".into(),
                kind: ArtifactKind::Template,
                size: 512,
                content_hash: "ab".repeat(32),
            },
            findings_summary: FindingsSummary::from_findings(&findings),
            findings,
            dimensions: Dimension::ALL
                .into_iter()
                .map(|dimension| DimensionScore {
                    dimension,
                    score: match dimension {
                        Dimension::Security => Some(75),
                        Dimension::Compliance => Some(75),
                        Dimension::Cost => None,
                        _ => Some(100),
                    },
                    finding_count: usize::from(matches!(
                        dimension,
                        Dimension::Security | Dimension::Compliance
                    )),
                })
                .collect(),
            overall_score: 85,
            threshold: 80,
            passed: false,
            tool_runs: vec![ToolRun {
                tool: "arm-ttk".into(),
                status: ToolRunStatus::TimedOut,
                exit_code: None,
                duration_ms: 240_000,
                truncated: false,
                attempts: 2,
            }],
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::from_str("text").unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::from_str("sarif").is_err());
    }
}
