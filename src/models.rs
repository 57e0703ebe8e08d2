//! Core data models for armvet
//!
//! These models flow through the whole pipeline: the validation target,
//! the normalized findings every check and validator produces, and the
//! report the scorer assembles from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Generate a deterministic finding ID based on content hash.
///
/// Stable across runs so a finding can be tracked between the before and
/// after reports of an optimization pass. The ID is a 16-character hex
/// string derived from the rule, file, JSON pointer and message.
pub fn deterministic_finding_id(rule: &str, file: &str, pointer: &str, message: &str) -> String {
    let input = format!("{rule}\n{file}\n{pointer}\n{message}");
    let digest = Sha256::digest(input.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Severity levels for findings
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A named axis of quality, scored independently
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Security,
    Structure,
    Compliance,
    Performance,
    Cost,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Security,
        Dimension::Structure,
        Dimension::Compliance,
        Dimension::Performance,
        Dimension::Cost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Security => "security",
            Dimension::Structure => "structure",
            Dimension::Compliance => "compliance",
            Dimension::Performance => "performance",
            Dimension::Cost => "cost",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of marketplace artifact a target is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// `mainTemplate.json` or any deployment template (`.json` / `.bicep`)
    Template,
    /// `createUiDefinition.json`
    UiDefinition,
    /// `viewDefinition.json` (managed application views)
    ViewDefinition,
    /// Directory holding the whole offer package
    PackageRoot,
}

impl ArtifactKind {
    /// Infer the kind from a path on disk
    pub fn infer(path: &Path) -> ArtifactKind {
        if path.is_dir() {
            return ArtifactKind::PackageRoot;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match name.as_str() {
            "createuidefinition.json" => ArtifactKind::UiDefinition,
            "viewdefinition.json" => ArtifactKind::ViewDefinition,
            _ => ArtifactKind::Template,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Template => "template",
            ArtifactKind::UiDefinition => "ui-definition",
            ArtifactKind::ViewDefinition => "view-definition",
            ArtifactKind::PackageRoot => "package-root",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "template" => Ok(ArtifactKind::Template),
            "ui-definition" | "ui" => Ok(ArtifactKind::UiDefinition),
            "view-definition" | "view" => Ok(ArtifactKind::ViewDefinition),
            "package-root" | "package" => Ok(ArtifactKind::PackageRoot),
            _ => Err(format!(
                "Unknown artifact kind '{}'. Valid kinds: template, ui-definition, view-definition, package-root",
                s
            )),
        }
    }
}

/// An artifact to be checked. Immutable for the lifetime of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTarget {
    /// Absolute, canonicalized path inside an allowed root
    pub path: PathBuf,
    pub kind: ArtifactKind,
    /// Size in bytes (sum of artifact files for a package root)
    pub size: u64,
    /// Hex SHA-256 of the artifact content
    pub content_hash: String,
}

/// Where a finding points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceLocation {
    pub file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// RFC 6901 JSON pointer into the artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
}

impl SourceLocation {
    pub fn file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    pub fn with_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }
}

/// One normalized issue reported by a validator or a built-in check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    /// Stable rule identifier (e.g. `parameter-missing-description`)
    pub rule: String,
    /// `builtin` or the external validator's name
    pub source: String,
    pub severity: Severity,
    pub dimension: Dimension,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Captured tool output attached by exit-code-only adapters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Finding {
    pub fn new(
        rule: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
        dimension: Dimension,
        message: impl Into<String>,
    ) -> Self {
        let mut finding = Self {
            id: String::new(),
            rule: rule.into(),
            source: source.into(),
            severity,
            dimension,
            message: message.into(),
            remediation: None,
            location: None,
            context: None,
        };
        finding.refresh_id();
        finding
    }

    pub fn with_remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self.refresh_id();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// JSON pointer of the location, if any
    pub fn pointer(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.pointer.as_deref())
    }

    fn refresh_id(&mut self) {
        let (file, pointer) = match &self.location {
            Some(loc) => (
                loc.file.to_string_lossy().to_string(),
                loc.pointer.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        self.id = deterministic_finding_id(&self.rule, &file, &pointer, &self.message);
    }
}

/// Summary of findings by severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
    pub total: usize,
}

impl FindingsSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self::default();
        for f in findings {
            match f.severity {
                Severity::Error => summary.error += 1,
                Severity::Warning => summary.warning += 1,
                Severity::Info => summary.info += 1,
            }
            summary.total += 1;
        }
        summary
    }
}

/// How an external validator's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolRunStatus {
    /// Ran and its output was normalized (findings may be present)
    Completed,
    /// Exited with a code outside its success/findings range
    Failed,
    /// Exceeded the timeout on every attempt
    TimedOut,
    /// Ran but the output could not be normalized
    Unparsable,
}

impl ToolRunStatus {
    /// Whether the tool's checks actually ran against the artifact
    pub fn ran(&self) -> bool {
        matches!(self, ToolRunStatus::Completed)
    }
}

/// Exit metadata for one external validator in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub status: ToolRunStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub truncated: bool,
    pub attempts: u32,
}

/// Score of one dimension; `None` when the dimension was not applicable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub score: Option<u32>,
    pub finding_count: usize,
}

/// The aggregate result of one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub run_id: String,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub target: ValidationTarget,
    pub findings: Vec<Finding>,
    pub findings_summary: FindingsSummary,
    pub dimensions: Vec<DimensionScore>,
    pub overall_score: u32,
    pub threshold: u32,
    pub passed: bool,
    pub tool_runs: Vec<ToolRun>,
}

impl ValidationReport {
    /// Score for a dimension, `None` if it was excluded
    pub fn dimension_score(&self, dimension: Dimension) -> Option<u32> {
        self.dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .and_then(|d| d.score)
    }

    pub fn has_rule(&self, rule: &str) -> bool {
        self.findings.iter().any(|f| f.rule == rule)
    }

    /// Tools that could not produce a usable result
    pub fn tools_not_run(&self) -> impl Iterator<Item = &ToolRun> {
        self.tool_runs.iter().filter(|t| !t.status.ran())
    }

    /// Same findings, scores and verdict, ignoring run identity and timestamp
    pub fn same_outcome(&self, other: &ValidationReport) -> bool {
        self.target == other.target
            && self.findings == other.findings
            && self.dimensions == other.dimensions
            && self.overall_score == other.overall_score
            && self.passed == other.passed
    }

    /// Compare against an earlier report of the same artifact
    pub fn delta_from(&self, before: &ValidationReport) -> ReportDelta {
        let before_ids: BTreeSet<&str> = before.findings.iter().map(|f| f.id.as_str()).collect();
        let after_ids: BTreeSet<&str> = self.findings.iter().map(|f| f.id.as_str()).collect();

        ReportDelta {
            resolved: before
                .findings
                .iter()
                .filter(|f| !after_ids.contains(f.id.as_str()))
                .map(|f| f.id.clone())
                .collect(),
            introduced: self
                .findings
                .iter()
                .filter(|f| !before_ids.contains(f.id.as_str()))
                .map(|f| f.id.clone())
                .collect(),
            score_change: self.overall_score as i64 - before.overall_score as i64,
        }
    }
}

/// Difference between two reports of the same artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDelta {
    pub resolved: Vec<String>,
    pub introduced: Vec<String>,
    pub score_change: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_id_is_deterministic() {
        let a = Finding::new("r", "builtin", Severity::Error, Dimension::Security, "msg")
            .with_location(SourceLocation::file("t.json").with_pointer("/parameters/a"));
        let b = Finding::new("r", "builtin", Severity::Error, Dimension::Security, "msg")
            .with_location(SourceLocation::file("t.json").with_pointer("/parameters/a"));
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 16);

        let c = Finding::new("r", "builtin", Severity::Error, Dimension::Security, "msg")
            .with_location(SourceLocation::file("t.json").with_pointer("/parameters/b"));
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_infer_kind_from_name() {
        assert_eq!(
            ArtifactKind::infer(Path::new("pkg/createUiDefinition.json")),
            ArtifactKind::UiDefinition
        );
        assert_eq!(
            ArtifactKind::infer(Path::new("pkg/viewDefinition.json")),
            ArtifactKind::ViewDefinition
        );
        assert_eq!(
            ArtifactKind::infer(Path::new("pkg/mainTemplate.json")),
            ArtifactKind::Template
        );
    }

    #[test]
    fn test_summary_counts() {
        let findings = vec![
            Finding::new("a", "builtin", Severity::Error, Dimension::Security, "x"),
            Finding::new("b", "builtin", Severity::Warning, Dimension::Structure, "y"),
            Finding::new("c", "builtin", Severity::Warning, Dimension::Structure, "z"),
        ];
        let summary = FindingsSummary::from_findings(&findings);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.warning, 2);
        assert_eq!(summary.total, 3);
    }
}
