//! Template Analyzer adapter
//!
//! Runs `TemplateAnalyzer analyze-template <file> --report-format Sarif`
//! (or `analyze-directory` for a package root) and reads the SARIF log it
//! writes to stdout.

use super::{
    report_path, tool_finding, Invocation, ParseError, ParsedOutput, Validator, ValidatorContext,
};
use crate::input::{sanitize_for_display, Rejection};
use crate::models::{ArtifactKind, Dimension, Severity, SourceLocation, ValidationTarget};
use crate::process::{ProcessResult, ToolArg, ToolSpec};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

pub const NAME: &str = "template-analyzer";

/// Exit codes meaning "analysis ran and found violations"
const VIOLATION_EXIT_CODES: &[i32] = &[20, 21];

/// SARIF `level` -> severity
const SEVERITIES: &[(&str, Severity)] = &[
    ("error", Severity::Error),
    ("warning", Severity::Warning),
    ("note", Severity::Info),
    ("none", Severity::Info),
];

/// Rule id prefix -> dimension. Template Analyzer's own `TA-` rules are
/// security rules; the bundled best-practice rules are compliance.
const DIMENSION_PREFIXES: &[(&str, Dimension)] = &[("TA-", Dimension::Security)];

const COVERED: &[Dimension] = &[Dimension::Security, Dimension::Compliance];

#[derive(Debug, Deserialize)]
struct SarifLog {
    runs: Vec<SarifRun>,
}

#[derive(Debug, Deserialize)]
struct SarifRun {
    #[serde(default)]
    tool: Option<SarifTool>,
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Debug, Deserialize)]
struct SarifDriver {
    #[serde(default)]
    rules: Vec<SarifRule>,
}

#[derive(Debug, Deserialize)]
struct SarifRule {
    id: String,
    #[serde(rename = "helpUri")]
    help_uri: Option<String>,
    #[serde(rename = "fullDescription")]
    full_description: Option<SarifText>,
}

#[derive(Debug, Deserialize)]
struct SarifText {
    text: String,
}

/// The fields of a SARIF result this adapter needs
#[derive(Debug, Deserialize)]
struct SarifResult {
    #[serde(rename = "ruleId")]
    rule_id: String,
    /// SARIF's default level is `warning`
    #[serde(default = "default_level")]
    level: String,
    message: SarifText,
    #[serde(default)]
    locations: Vec<SarifLocation>,
}

fn default_level() -> String {
    "warning".to_string()
}

#[derive(Debug, Deserialize)]
struct SarifLocation {
    #[serde(rename = "physicalLocation")]
    physical_location: Option<SarifPhysicalLocation>,
}

#[derive(Debug, Deserialize)]
struct SarifPhysicalLocation {
    #[serde(rename = "artifactLocation")]
    artifact_location: Option<SarifArtifactLocation>,
    region: Option<SarifRegion>,
}

#[derive(Debug, Deserialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct SarifRegion {
    #[serde(rename = "startLine")]
    start_line: Option<u32>,
}

fn dimension_for(rule_id: &str) -> Dimension {
    DIMENSION_PREFIXES
        .iter()
        .find(|(prefix, _)| rule_id.starts_with(prefix))
        .map(|(_, d)| *d)
        .unwrap_or(Dimension::Compliance)
}

pub struct TemplateAnalyzerValidator;

impl Validator for TemplateAnalyzerValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(NAME, "TemplateAnalyzer")
            .with_env(&["HOME", "DOTNET_ROOT"])
            .with_findings_exit_codes(VIOLATION_EXIT_CODES)
            .with_primary_dimension(Dimension::Security)
    }

    fn applies_to(&self, target: &ValidationTarget) -> bool {
        match target.kind {
            ArtifactKind::Template => target.path.extension().is_some_and(|e| e == "json"),
            ArtifactKind::PackageRoot => true,
            _ => false,
        }
    }

    fn dimensions(&self) -> &'static [Dimension] {
        COVERED
    }

    fn arguments(&self, ctx: &ValidatorContext<'_>) -> Result<Invocation, Rejection> {
        let command = if ctx.target.kind == ArtifactKind::PackageRoot {
            "analyze-directory"
        } else {
            "analyze-template"
        };
        Ok(Invocation::new(vec![
            ToolArg::flag(command),
            ToolArg::path(ctx.path),
            ToolArg::flag("--report-format"),
            ToolArg::flag("Sarif"),
        ]))
    }

    fn parse(
        &self,
        result: &ProcessResult,
        ctx: &ValidatorContext<'_>,
    ) -> Result<ParsedOutput, ParseError> {
        let stdout = result.stdout.trim();
        if stdout.is_empty() {
            return Err(ParseError::Empty);
        }
        let log: SarifLog =
            serde_json::from_str(stdout).map_err(|e| ParseError::malformed("SARIF", e))?;

        let base = ctx.base_dir();
        let mut out = ParsedOutput::default();

        for run in log.runs {
            let rules: HashMap<String, SarifRule> = run
                .tool
                .map(|t| t.driver.rules)
                .unwrap_or_default()
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect();

            for raw in run.results {
                let Ok(item) = serde_json::from_value::<SarifResult>(raw) else {
                    out.dropped += 1;
                    continue;
                };
                let Some(severity) = SEVERITIES
                    .iter()
                    .find(|(level, _)| level.eq_ignore_ascii_case(&item.level))
                    .map(|(_, s)| *s)
                else {
                    out.dropped += 1;
                    continue;
                };
                if item.rule_id.trim().is_empty() || item.message.text.trim().is_empty() {
                    out.dropped += 1;
                    continue;
                }

                let mut finding = tool_finding(
                    NAME,
                    &item.rule_id,
                    severity,
                    dimension_for(&item.rule_id),
                    &item.message.text,
                );

                if let Some(rule) = rules.get(&item.rule_id) {
                    let hint = match (&rule.full_description, &rule.help_uri) {
                        (Some(desc), Some(uri)) => Some(format!("{} ({})", desc.text, uri)),
                        (Some(desc), None) => Some(desc.text.clone()),
                        (None, Some(uri)) => Some(uri.clone()),
                        (None, None) => None,
                    };
                    if let Some(hint) = hint {
                        finding = finding.with_remediation(sanitize_for_display(&hint));
                    }
                }

                let physical = item
                    .locations
                    .into_iter()
                    .find_map(|l| l.physical_location);
                if let Some(physical) = physical {
                    if let Some(artifact) = physical.artifact_location {
                        let line = physical.region.and_then(|r| r.start_line);
                        finding = finding.with_location(
                            SourceLocation::file(report_path(&artifact.uri, &base)).with_line(line),
                        );
                    }
                }

                out.findings.push(finding);
            }
        }

        debug!(
            "template-analyzer: {} findings, {} results dropped",
            out.findings.len(),
            out.dropped
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::test_support::{result, Fixture};

    fn sarif(results: serde_json::Value) -> String {
        serde_json::json!({
            "version": "2.1.0",
            "runs": [{
                "tool": {"driver": {"name": "ARM BPA", "rules": [
                    {"id": "TA-000004", "fullDescription": {"text": "Use HTTPS"},
                     "helpUri": "https://github.com/Azure/template-analyzer/docs"}
                ]}},
                "results": results
            }]
        })
        .to_string()
    }

    #[test]
    fn test_arguments_for_file_and_directory() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        let argv = TemplateAnalyzerValidator.arguments(&fixture.ctx()).unwrap().argv;
        assert_eq!(argv[0].as_os_str(), "analyze-template");
        assert_eq!(argv[1].as_os_str(), fixture.path.as_os_str());
        assert_eq!(argv[3].as_os_str(), "Sarif");
    }

    #[test]
    fn test_parse_sarif() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        let uri = format!("file://{}", fixture.path);
        let stdout = sarif(serde_json::json!([
            {"ruleId": "TA-000004", "level": "error",
             "message": {"text": "API app should only be accessible over HTTPS"},
             "locations": [{"physicalLocation": {
                 "artifactLocation": {"uri": uri}, "region": {"startLine": 42}}}]},
            {"ruleId": "BP-0001", "message": {"text": "Default level"}},
            {"ruleId": "BP-0002", "level": "note", "message": {"text": "A note"}},
            {"ruleId": "BP-0003", "level": "catastrophic", "message": {"text": "?"}},
            {"level": "error", "message": {"text": "no rule id"}},
            {"ruleId": "BP-0004", "level": "error"}
        ]));

        let out = TemplateAnalyzerValidator
            .parse(&result(NAME, 20, &stdout, ""), &fixture.ctx())
            .unwrap();

        assert_eq!(out.findings.len(), 3);
        assert_eq!(out.dropped, 3);

        let https = &out.findings[0];
        assert_eq!(https.rule, "TA-000004");
        assert_eq!(https.severity, Severity::Error);
        assert_eq!(https.dimension, Dimension::Security);
        let location = https.location.as_ref().unwrap();
        assert_eq!(location.file, std::path::PathBuf::from("mainTemplate.json"));
        assert_eq!(location.line, Some(42));
        assert!(https.remediation.as_deref().unwrap().starts_with("Use HTTPS"));

        assert_eq!(out.findings[1].severity, Severity::Warning);
        assert_eq!(out.findings[1].dimension, Dimension::Compliance);
        assert_eq!(out.findings[2].severity, Severity::Info);
    }

    #[test]
    fn test_clean_run_has_no_findings() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        let out = TemplateAnalyzerValidator
            .parse(&result(NAME, 0, &sarif(serde_json::json!([])), ""), &fixture.ctx())
            .unwrap();
        assert!(out.findings.is_empty());
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn test_not_sarif_is_unparsable() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        let err = TemplateAnalyzerValidator
            .parse(&result(NAME, 0, r#"{"results": []}"#, ""), &fixture.ctx())
            .unwrap_err();
        assert!(matches!(err, ParseError::Malformed { format: "SARIF", .. }));
    }

    #[test]
    fn test_violation_exit_codes_count_as_ran() {
        let spec = TemplateAnalyzerValidator.spec();
        assert!(spec.exit_code_ran(20));
        assert!(spec.exit_code_ran(21));
        assert!(!spec.exit_code_ran(1));
    }
}
