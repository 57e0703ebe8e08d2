//! Built-in checks
//!
//! In-process rules over the parsed JSON of each marketplace artifact.
//! They run on every validation, with or without external validators.
//!
//! # Architecture
//!
//! ```text
//! run_builtin_checks(target)
//!   ├── Template        -> TemplateCheck
//!   ├── UiDefinition    -> UiDefinitionCheck
//!   ├── ViewDefinition  -> ViewDefinitionCheck
//!   └── PackageRoot     -> package rules + each artifact found inside
//! ```
//!
//! Each check declares the dimensions it covers; the union over the checks
//! that actually ran is the covered set handed to the scorer.

pub mod package;
pub mod template;
pub mod ui_definition;
pub mod view_definition;

pub use template::TemplateCheck;
pub use ui_definition::UiDefinitionCheck;
pub use view_definition::ViewDefinitionCheck;

use crate::input::{CanonicalPath, Rejection};
use crate::models::{ArtifactKind, Dimension, Finding, Severity, SourceLocation, ValidationTarget};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// `Finding::source` for built-in rules
pub const BUILTIN_SOURCE: &str = "builtin";

/// Largest artifact file the checks will load
pub const MAX_ARTIFACT_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Findings from the built-in checks plus the dimensions they covered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    pub findings: Vec<Finding>,
    pub covered: BTreeSet<Dimension>,
}

impl CheckOutcome {
    fn merge(&mut self, other: CheckOutcome) {
        self.findings.extend(other.findings);
        self.covered.extend(other.covered);
    }
}

/// One artifact loaded for checking
#[derive(Debug, Clone)]
pub struct ArtifactDocument {
    /// Path shown in findings, relative to the target directory
    pub file: PathBuf,
    pub text: String,
    pub json: JsonValue,
}

impl ArtifactDocument {
    pub fn new(file: impl Into<PathBuf>, text: impl Into<String>, json: JsonValue) -> Self {
        Self {
            file: file.into(),
            text: text.into(),
            json,
        }
    }

    /// Build a built-in finding located at `pointer`.
    ///
    /// `needle` is searched for (quoted) in the source text to give the
    /// finding a best-effort line number.
    pub fn finding(
        &self,
        rule: &str,
        severity: Severity,
        dimension: Dimension,
        message: impl Into<String>,
        pointer: &str,
        needle: Option<&str>,
    ) -> Finding {
        let line = needle.and_then(|n| line_of(&self.text, n));
        Finding::new(rule, BUILTIN_SOURCE, severity, dimension, message).with_location(
            SourceLocation::file(&self.file)
                .with_pointer(pointer)
                .with_line(line),
        )
    }
}

/// Rules for one artifact kind
pub trait Check: Send + Sync {
    /// Unique identifier for this check
    fn name(&self) -> &'static str;

    /// The artifact kind this check understands
    fn kind(&self) -> ArtifactKind;

    /// Dimensions its rules report on
    fn dimensions(&self) -> &'static [Dimension];

    /// Run every rule against one document
    fn run(&self, doc: &ArtifactDocument) -> Vec<Finding>;
}

/// The check for a file artifact kind
pub fn check_for(kind: ArtifactKind) -> Option<Box<dyn Check>> {
    match kind {
        ArtifactKind::Template => Some(Box::new(TemplateCheck)),
        ArtifactKind::UiDefinition => Some(Box::new(UiDefinitionCheck)),
        ArtifactKind::ViewDefinition => Some(Box::new(ViewDefinitionCheck)),
        ArtifactKind::PackageRoot => None,
    }
}

/// Run the built-in checks for a validated target
pub fn run_builtin_checks(
    target: &ValidationTarget,
    path: &CanonicalPath,
) -> Result<CheckOutcome, CheckError> {
    let outcome = match target.kind {
        ArtifactKind::PackageRoot => package::check_package(path)?,
        kind => {
            let shown = path
                .as_path()
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_default();
            check_file(kind, path, &shown)?
        }
    };
    debug!(
        "Built-in checks: {} findings over {} dimensions",
        outcome.findings.len(),
        outcome.covered.len()
    );
    Ok(outcome)
}

/// Load and check one artifact file.
///
/// Non-JSON templates (Bicep) are left to `bicep-lint` and cover nothing
/// here. A file that is not valid JSON yields `json-invalid` and covers
/// only the structure dimension.
pub(crate) fn check_file(
    kind: ArtifactKind,
    path: &CanonicalPath,
    shown: &Path,
) -> Result<CheckOutcome, CheckError> {
    let mut outcome = CheckOutcome::default();
    let Some(check) = check_for(kind) else {
        return Ok(outcome);
    };
    if !path
        .as_path()
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
    {
        debug!("Skipping built-in checks for non-JSON {}", shown.display());
        return Ok(outcome);
    }

    let text = read_artifact(path)?;
    match serde_json::from_str::<JsonValue>(&text) {
        Ok(json) => {
            let doc = ArtifactDocument::new(shown, text, json);
            outcome.findings = check.run(&doc);
            outcome.covered.extend(check.dimensions().iter().copied());
        }
        Err(e) => {
            outcome.findings.push(json_invalid(shown, &e));
            outcome.covered.insert(Dimension::Structure);
        }
    }
    Ok(outcome)
}

pub(crate) fn read_artifact(path: &CanonicalPath) -> Result<String, CheckError> {
    let io_err = |source| CheckError::Io {
        path: path.as_path().to_path_buf(),
        source,
    };
    let size = std::fs::metadata(path.as_path()).map_err(io_err)?.len();
    if size > MAX_ARTIFACT_BYTES {
        return Err(Rejection::invalid("artifact", format!("larger than {} bytes", MAX_ARTIFACT_BYTES)).into());
    }
    let bytes = std::fs::read(path.as_path()).map_err(io_err)?;
    // Editors on Windows like to save a BOM.
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn json_invalid(shown: &Path, error: &serde_json::Error) -> Finding {
    Finding::new(
        "json-invalid",
        BUILTIN_SOURCE,
        Severity::Error,
        Dimension::Structure,
        format!("File is not valid JSON: {}", error),
    )
    .with_remediation("Fix the JSON syntax; other checks could not run on this file")
    .with_location(SourceLocation::file(shown).with_line(u32::try_from(error.line()).ok()))
}

/// 1-based line of the first occurrence of `"needle"`
pub(crate) fn line_of(text: &str, needle: &str) -> Option<u32> {
    let quoted = format!("\"{}\"", needle);
    text.lines()
        .position(|line| line.contains(&quoted))
        .and_then(|i| u32::try_from(i + 1).ok())
}

/// Escape one RFC 6901 reference token
pub fn pointer_token(raw: &str) -> String {
    raw.replace('~', "~0").replace('/', "~1")
}

/// ARM template expression (`[...]`, but not the `[[` literal escape)
pub(crate) fn is_expression(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with('[') && !trimmed.starts_with("[[") && trimmed.ends_with(']')
}

/// `$schema` of a document, if it is a string
pub(crate) fn schema(json: &JsonValue) -> Option<&str> {
    json.get("$schema").and_then(JsonValue::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_token() {
        assert_eq!(pointer_token("a/b~c"), "a~1b~0c");
    }

    #[test]
    fn test_is_expression() {
        assert!(is_expression("[parameters('location')]"));
        assert!(!is_expression("[[literal]"));
        assert!(!is_expression("westus"));
    }

    #[test]
    fn test_line_of() {
        let text = "{\n  \"parameters\": {\n    \"adminPassword\": {}\n  }\n}";
        assert_eq!(line_of(text, "adminPassword"), Some(3));
        assert_eq!(line_of(text, "missing"), None);
    }

    #[test]
    fn test_invalid_json_covers_structure_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mainTemplate.json");
        std::fs::write(&file, "{ \"$schema\": ").unwrap();
        let guard = crate::input::PathGuard::new([dir.path()]);
        let path = guard.validate_path(&file).unwrap();

        let outcome = check_file(ArtifactKind::Template, &path, Path::new("mainTemplate.json")).unwrap();
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].rule, "json-invalid");
        assert_eq!(outcome.covered, BTreeSet::from([Dimension::Structure]));
    }

    #[test]
    fn test_bicep_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.bicep");
        std::fs::write(&file, "param location string").unwrap();
        let guard = crate::input::PathGuard::new([dir.path()]);
        let path = guard.validate_path(&file).unwrap();

        let outcome = check_file(ArtifactKind::Template, &path, Path::new("main.bicep")).unwrap();
        assert!(outcome.findings.is_empty());
        assert!(outcome.covered.is_empty());
    }

    #[test]
    fn test_bom_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("viewDefinition.json");
        std::fs::write(&file, "\u{feff}{\"$schema\": \"https://schema.management.azure.com/schemas/viewdefinition/0.0.1-preview/ViewDefinition.json#\", \"views\": []}").unwrap();
        let guard = crate::input::PathGuard::new([dir.path()]);
        let path = guard.validate_path(&file).unwrap();

        let outcome = check_file(ArtifactKind::ViewDefinition, &path, Path::new("viewDefinition.json")).unwrap();
        assert!(!outcome.findings.iter().any(|f| f.rule == "json-invalid"));
    }
}
