//! ARM Template Test Toolkit (arm-ttk) adapter
//!
//! arm-ttk is a PowerShell module, so it is driven through
//! `pwsh -NoProfile -NonInteractive -Command <script>` where the script is
//! built by [`ScriptBuilder`]. Results come back through `ConvertTo-Json`,
//! one record per test:
//!
//! ```json
//! {"Name": "Location Should Not Be Hardcoded", "Group": "deploymentTemplate",
//!  "Passed": false, "Errors": [{"Exception": {"Message": "..."}}],
//!  "Warnings": [], "File": {"FullPath": "/pkg/mainTemplate.json"}}
//! ```

use super::{
    lookup, report_path, rule_slug, tool_finding, Invocation, ParseError, ParsedOutput,
    Validator, ValidatorContext,
};
use crate::input::{sanitize_for_display, validate_identifier, IdentifierKind, Rejection};
use crate::models::{ArtifactKind, Dimension, Finding, Severity, SourceLocation, ValidationTarget};
use crate::process::{ProcessResult, ScriptBuilder, ToolArg, ToolSpec};
use serde_json::Value as JsonValue;
use tracing::debug;

pub const NAME: &str = "arm-ttk";

/// Test name -> dimension. Anything else is a marketplace compliance test.
const DIMENSIONS: &[(&str, Dimension)] = &[
    ("Secure String Parameters Cannot Have Default", Dimension::Security),
    ("Outputs Must Not Contain Secrets", Dimension::Security),
    ("adminUsername Should Not Be A Literal", Dimension::Security),
    ("Secure Params In Nested Deployments", Dimension::Security),
    ("CommandToExecute Must Use ProtectedSettings For Secrets", Dimension::Security),
    ("Password params must be secure", Dimension::Security),
    ("ManagedIdentityExtension must not be used", Dimension::Security),
    ("Parameters Must Be Referenced", Dimension::Structure),
    ("Variables Must Be Referenced", Dimension::Structure),
    ("DependsOn Best Practices", Dimension::Structure),
    ("DependsOn Must Not Be Conditional", Dimension::Structure),
    ("IDs Should Be Derived From ResourceIDs", Dimension::Structure),
    ("ResourceIds should not contain", Dimension::Structure),
    ("Template Should Not Contain Blanks", Dimension::Structure),
    ("Min And Max Value Are Numbers", Dimension::Structure),
    ("Dynamic Variable References Should Not Use Concat", Dimension::Performance),
    ("VM Size Should Be A Parameter", Dimension::Cost),
    ("VM Images Should Use Latest Version", Dimension::Cost),
];

const COVERED: &[Dimension] = &[
    Dimension::Compliance,
    Dimension::Security,
    Dimension::Structure,
    Dimension::Performance,
    Dimension::Cost,
];

pub struct ArmTtkValidator;

impl ArmTtkValidator {
    fn script(ctx: &ValidatorContext<'_>) -> Result<ToolArg, Rejection> {
        let ttk = &ctx.policy.tools.arm_ttk;
        let module = ttk
            .module_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "arm-ttk".to_string());

        let mut script = ScriptBuilder::powershell()
            .raw("$ErrorActionPreference = 'Stop'; Import-Module ")
            .quoted(&module)?
            .raw("; Test-AzTemplate -TemplatePath ")
            .quoted(&ctx.path.as_path().to_string_lossy())?;

        if !ttk.skip.is_empty() {
            let skip = ttk
                .skip
                .iter()
                .map(|name| validate_identifier(name, IdentifierKind::TestName))
                .collect::<Result<Vec<_>, _>>()?;
            let names: Vec<&str> = skip.iter().map(|id| id.as_str()).collect();
            script = script.raw(" -Skip ").quoted_list(&names)?;
        }

        Ok(ToolArg::script(
            script.raw(" | ConvertTo-Json -Depth 6 -Compress").build(),
        ))
    }

    fn record_findings(
        record: &JsonValue,
        ctx: &ValidatorContext<'_>,
        out: &mut ParsedOutput,
    ) {
        let (Some(name), Some(passed)) = (
            record.get("Name").and_then(JsonValue::as_str),
            record.get("Passed").and_then(JsonValue::as_bool),
        ) else {
            out.dropped += 1;
            return;
        };
        if passed {
            return;
        }

        let rule = rule_slug(name);
        let dimension = lookup(DIMENSIONS, name, Dimension::Compliance);
        let location = record
            .get("File")
            .and_then(|f| f.get("FullPath").or_else(|| f.get("Name")))
            .and_then(JsonValue::as_str)
            .map(|p| SourceLocation::file(report_path(p, &ctx.base_dir())));

        let make = |severity: Severity, message: &str| -> Finding {
            let finding = tool_finding(NAME, &rule, severity, dimension, message)
                .with_remediation(format!("See the arm-ttk test: {}", sanitize_for_display(name)));
            match &location {
                Some(loc) => finding.with_location(loc.clone()),
                None => finding,
            }
        };

        let before = out.findings.len();
        for (key, severity) in [("Errors", Severity::Error), ("Warnings", Severity::Warning)] {
            for entry in entries(record.get(key)) {
                match entry_message(entry) {
                    Some(message) => out.findings.push(make(severity, &message)),
                    None => out.dropped += 1,
                }
            }
        }

        if out.findings.len() == before {
            out.findings
                .push(make(Severity::Error, &format!("Test failed: {}", name)));
        }
    }
}

/// `Errors`/`Warnings` may be absent, a single object, or an array
fn entries(value: Option<&JsonValue>) -> Vec<&JsonValue> {
    match value {
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(JsonValue::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn entry_message(entry: &JsonValue) -> Option<String> {
    let text = match entry {
        JsonValue::String(s) => Some(s.as_str()),
        JsonValue::Object(_) => entry
            .get("Exception")
            .and_then(|e| e.get("Message"))
            .or_else(|| entry.get("Message"))
            .and_then(JsonValue::as_str),
        _ => None,
    }?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

impl Validator for ArmTtkValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(NAME, "pwsh")
            .with_env(&["HOME", "PSModulePath"])
            .with_primary_dimension(Dimension::Compliance)
    }

    fn applies_to(&self, target: &ValidationTarget) -> bool {
        match target.kind {
            ArtifactKind::Template => target.path.extension().is_some_and(|e| e == "json"),
            ArtifactKind::UiDefinition | ArtifactKind::PackageRoot => true,
            ArtifactKind::ViewDefinition => false,
        }
    }

    fn dimensions(&self) -> &'static [Dimension] {
        COVERED
    }

    fn arguments(&self, ctx: &ValidatorContext<'_>) -> Result<Invocation, Rejection> {
        Ok(Invocation::new(vec![
            ToolArg::flag("-NoProfile"),
            ToolArg::flag("-NonInteractive"),
            ToolArg::flag("-Command"),
            Self::script(ctx)?,
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
        let json: JsonValue =
            serde_json::from_str(stdout).map_err(|e| ParseError::malformed("JSON", e))?;

        let records: Vec<&JsonValue> = match &json {
            JsonValue::Array(items) => items.iter().collect(),
            JsonValue::Object(_) => vec![&json],
            _ => return Err(ParseError::malformed("JSON", "expected test records")),
        };

        let mut out = ParsedOutput::default();
        for record in records {
            Self::record_findings(record, ctx, &mut out);
        }
        debug!(
            "arm-ttk: {} findings, {} records dropped",
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

    #[test]
    fn test_script_quotes_hostile_path() {
        let fixture = Fixture::new("main'Template.json", "{}");
        let ctx = fixture.ctx();
        let invocation = ArmTtkValidator.arguments(&ctx).unwrap();
        assert_eq!(invocation.argv.len(), 4);
        let script = invocation.argv[3].as_os_str().to_string_lossy().into_owned();
        assert!(script.contains("main''Template.json'"));
        assert!(script.starts_with("$ErrorActionPreference = 'Stop'; Import-Module 'arm-ttk'"));
        assert!(script.ends_with(" | ConvertTo-Json -Depth 6 -Compress"));
    }

    #[test]
    fn test_skip_names_must_be_test_names() {
        let mut fixture = Fixture::new("mainTemplate.json", "{}");
        fixture.policy.tools.arm_ttk.skip = vec!["apiVersions Should Be Recent".to_string()];
        let invocation = ArmTtkValidator.arguments(&fixture.ctx()).unwrap();
        let script = invocation.argv[3].as_os_str().to_string_lossy().into_owned();
        assert!(script.contains(" -Skip 'apiVersions Should Be Recent'"));

        fixture.policy.tools.arm_ttk.skip = vec!["x'; Stop-Computer; '".to_string()];
        assert!(ArmTtkValidator.arguments(&fixture.ctx()).is_err());
    }

    #[test]
    fn test_parse_records() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        let file = fixture.path.to_string();
        let stdout = serde_json::json!([
            {"Name": "Location Should Not Be Hardcoded", "Passed": false,
             "Errors": [{"Exception": {"Message": "Found hardcoded location westus"}}],
             "File": {"FullPath": file}},
            {"Name": "Secure String Parameters Cannot Have Default", "Passed": false,
             "Errors": {"Message": "adminPassword has a default"}},
            {"Name": "Parameters Must Be Referenced", "Passed": false,
             "Warnings": ["Unreferenced parameter: foo"]},
            {"Name": "DeploymentTemplate Schema Is Correct", "Passed": true},
            {"Passed": false, "Errors": ["no name"]},
            {"Name": "Min And Max Value Are Numbers", "Passed": false, "Errors": [{"Unknown": 1}]}
        ])
        .to_string();

        let out = ArmTtkValidator
            .parse(&result(NAME, 0, &stdout, ""), &fixture.ctx())
            .unwrap();

        assert_eq!(out.dropped, 2);
        assert_eq!(out.findings.len(), 4);

        let location = &out.findings[0];
        assert_eq!(location.rule, "location-should-not-be-hardcoded");
        assert_eq!(location.source, "arm-ttk");
        assert_eq!(location.severity, Severity::Error);
        assert_eq!(location.dimension, Dimension::Compliance);
        assert_eq!(
            location.location.as_ref().map(|l| l.file.clone()),
            Some(std::path::PathBuf::from("mainTemplate.json"))
        );

        assert_eq!(out.findings[1].dimension, Dimension::Security);
        assert_eq!(out.findings[2].severity, Severity::Warning);
        assert_eq!(out.findings[2].dimension, Dimension::Structure);
        // Failed with only unreadable errors still reports the failure
        assert_eq!(out.findings[3].message, "Test failed: Min And Max Value Are Numbers");
    }

    #[test]
    fn test_single_record_object() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        let stdout = r#"{"Name":"VM Size Should Be A Parameter","Passed":false,"Errors":["vmSize literal"]}"#;
        let out = ArmTtkValidator
            .parse(&result(NAME, 0, stdout, ""), &fixture.ctx())
            .unwrap();
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].dimension, Dimension::Cost);
    }

    #[test]
    fn test_all_passed_yields_nothing() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        let stdout = r#"[{"Name":"a","Passed":true},{"Name":"b","Passed":true}]"#;
        let out = ArmTtkValidator
            .parse(&result(NAME, 0, stdout, ""), &fixture.ctx())
            .unwrap();
        assert!(out.findings.is_empty());
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn test_garbage_is_unparsable() {
        let fixture = Fixture::new("mainTemplate.json", "{}");
        assert!(matches!(
            ArmTtkValidator.parse(&result(NAME, 0, "Import-Module: not found", ""), &fixture.ctx()),
            Err(ParseError::Malformed { .. })
        ));
        assert_eq!(
            ArmTtkValidator.parse(&result(NAME, 0, "  \n", ""), &fixture.ctx()),
            Err(ParseError::Empty)
        );
        assert!(ArmTtkValidator
            .parse(&result(NAME, 0, "42", ""), &fixture.ctx())
            .is_err());
    }
}
