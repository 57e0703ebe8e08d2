//! Package root rules
//!
//! A marketplace package is a directory with `mainTemplate.json`,
//! `createUiDefinition.json` and optionally `viewDefinition.json` at the
//! top level. File names are matched case-insensitively.

use super::template::parameters;
use super::ui_definition::output_names;
use super::{check_file, pointer_token, read_artifact, CheckError, CheckOutcome, BUILTIN_SOURCE};
use crate::input::CanonicalPath;
use crate::models::{ArtifactKind, Dimension, Finding, Severity, SourceLocation};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::debug;

pub const MAIN_TEMPLATE: &str = "mainTemplate.json";
pub const UI_DEFINITION: &str = "createUiDefinition.json";
pub const VIEW_DEFINITION: &str = "viewDefinition.json";

const PACKAGE_DIMENSIONS: &[Dimension] = &[Dimension::Structure, Dimension::Compliance];

/// Locate a top-level artifact by case-insensitive name
pub fn find_artifact(root: &CanonicalPath, name: &str) -> Result<Option<CanonicalPath>, CheckError> {
    let entries = std::fs::read_dir(root.as_path()).map_err(|source| CheckError::Io {
        path: root.as_path().to_path_buf(),
        source,
    })?;
    let mut matches: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.eq_ignore_ascii_case(name))
        .collect();
    // Prefer the exact spelling if a case-sensitive file system has both.
    matches.sort_by_key(|n| n != name);
    match matches.first() {
        Some(found) => Ok(Some(root.child(found)?)),
        None => Ok(None),
    }
}

/// Run the package rules and every artifact check inside the package
pub fn check_package(root: &CanonicalPath) -> Result<CheckOutcome, CheckError> {
    let mut outcome = CheckOutcome::default();
    outcome.covered.extend(PACKAGE_DIMENSIONS.iter().copied());

    let template = find_artifact(root, MAIN_TEMPLATE)?;
    let ui = find_artifact(root, UI_DEFINITION)?;
    let view = find_artifact(root, VIEW_DEFINITION)?;

    if template.is_none() {
        outcome.findings.push(
            package_finding(
                "package-main-template-missing",
                Severity::Error,
                Dimension::Structure,
                "Package has no mainTemplate.json",
                MAIN_TEMPLATE,
            )
            .with_remediation("Add mainTemplate.json at the root of the package"),
        );
    }
    if ui.is_none() {
        outcome.findings.push(
            package_finding(
                "package-ui-definition-missing",
                Severity::Error,
                Dimension::Compliance,
                "Package has no createUiDefinition.json",
                UI_DEFINITION,
            )
            .with_remediation("Add createUiDefinition.json at the root of the package"),
        );
    }

    for (kind, found) in [
        (ArtifactKind::Template, &template),
        (ArtifactKind::UiDefinition, &ui),
        (ArtifactKind::ViewDefinition, &view),
    ] {
        if let Some(path) = found {
            outcome.merge(check_file(kind, path, &display_name(path))?);
        }
    }

    if let (Some(template), Some(ui)) = (&template, &ui) {
        outcome.findings.extend(cross_check(template, ui)?);
    }

    debug!(
        "Package {}: {} findings",
        root.as_path().display(),
        outcome.findings.len()
    );
    Ok(outcome)
}

fn display_name(path: &CanonicalPath) -> std::path::PathBuf {
    path.as_path()
        .file_name()
        .map(std::path::PathBuf::from)
        .unwrap_or_default()
}

fn package_finding(
    rule: &str,
    severity: Severity,
    dimension: Dimension,
    message: &str,
    file: &str,
) -> Finding {
    Finding::new(rule, BUILTIN_SOURCE, severity, dimension, message)
        .with_location(SourceLocation::file(file))
}

/// UI outputs and template parameters must line up. Files that are not
/// valid JSON were already reported by their own checks.
fn cross_check(template: &CanonicalPath, ui: &CanonicalPath) -> Result<Vec<Finding>, CheckError> {
    let parse = |path: &CanonicalPath| -> Result<Option<JsonValue>, CheckError> {
        Ok(serde_json::from_str(&read_artifact(path)?).ok())
    };
    let (Some(template_json), Some(ui_json)) = (parse(template)?, parse(ui)?) else {
        return Ok(Vec::new());
    };
    if ui_json.pointer("/parameters/outputs").is_none() {
        return Ok(Vec::new());
    }

    let template_file = display_name(template);
    let ui_file = display_name(ui);
    let params = parameters(&template_json);
    let outputs = output_names(&ui_json);
    let mut out = Vec::new();

    for output in &outputs {
        if !params.iter().any(|(p, _)| p.eq_ignore_ascii_case(output)) {
            out.push(mismatch(
                format!("UI output '{}' is not a parameter of the template", output),
                &ui_file,
                format!("/parameters/outputs/{}", pointer_token(output)),
            ));
        }
    }

    for (name, param) in &params {
        if param.get("defaultValue").is_some() {
            continue;
        }
        if !outputs.iter().any(|o| o.eq_ignore_ascii_case(name)) {
            out.push(mismatch(
                format!("Template parameter '{}' has no default and no UI output", name),
                &template_file,
                format!("/parameters/{}", pointer_token(name)),
            ));
        }
    }
    Ok(out)
}

fn mismatch(message: String, file: &Path, pointer: String) -> Finding {
    Finding::new(
        "ui-output-parameter-mismatch",
        BUILTIN_SOURCE,
        Severity::Error,
        Dimension::Compliance,
        message,
    )
    .with_remediation("Make createUiDefinition outputs match the template parameters")
    .with_location(SourceLocation::file(file).with_pointer(pointer))
}
