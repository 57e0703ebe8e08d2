//! Bicep linter adapter
//!
//! `bicep lint <file>` prints one diagnostic per line:
//!
//! ```text
//! /pkg/main.bicep(12,5) : Warning no-hardcoded-location: A resource location should not use a hard-coded string
//! ```

use super::{
    lookup, report_path, tool_finding, Invocation, ParseError, ParsedOutput, Validator,
    ValidatorContext,
};
use crate::input::Rejection;
use crate::models::{ArtifactKind, Dimension, Severity, SourceLocation, ValidationTarget};
use crate::process::{ProcessResult, ToolArg, ToolSpec};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

pub const NAME: &str = "bicep-lint";

static DIAGNOSTIC: OnceLock<Regex> = OnceLock::new();
static DIAGNOSTIC_PREFIX: OnceLock<Regex> = OnceLock::new();

fn diagnostic() -> &'static Regex {
    DIAGNOSTIC.get_or_init(|| {
        Regex::new(
            r"^(?P<file>.+?)\((?P<line>\d+),(?P<col>\d+)\)\s*:\s*(?P<level>Error|Warning|Info)\s+(?P<code>[A-Za-z0-9-]+):\s*(?P<msg>.*\S)\s*$",
        )
        .expect("valid regex")
    })
}

/// Looks like a diagnostic even if the rest of the line is unreadable
fn diagnostic_prefix() -> &'static Regex {
    DIAGNOSTIC_PREFIX.get_or_init(|| Regex::new(r"^.+?\(\d+,\d+\)\s*:").expect("valid regex"))
}

const SEVERITIES: &[(&str, Severity)] = &[
    ("Error", Severity::Error),
    ("Warning", Severity::Warning),
    ("Info", Severity::Info),
];

/// Linter rule -> dimension; compiler diagnostics (`BCPxxx`) and
/// unlisted rules are structural.
const DIMENSIONS: &[(&str, Dimension)] = &[
    ("secure-parameter-default", Dimension::Security),
    ("outputs-should-not-contain-secrets", Dimension::Security),
    ("protect-commandtoexecute-secrets", Dimension::Security),
    ("secure-secrets-in-params", Dimension::Security),
    ("adminusername-should-not-be-literal", Dimension::Security),
    ("use-secure-value-for-secure-inputs", Dimension::Security),
    ("no-hardcoded-location", Dimension::Compliance),
    ("no-loc-expr-outside-params", Dimension::Compliance),
    ("explicit-values-for-loc-params", Dimension::Compliance),
    ("use-recent-api-versions", Dimension::Compliance),
    ("no-hardcoded-env-urls", Dimension::Compliance),
    ("use-stable-vm-image", Dimension::Cost),
    ("no-unnecessary-dependson", Dimension::Performance),
];

const COVERED: &[Dimension] = &[
    Dimension::Structure,
    Dimension::Security,
    Dimension::Compliance,
    Dimension::Performance,
    Dimension::Cost,
];

pub struct BicepLintValidator;

impl Validator for BicepLintValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn spec(&self) -> ToolSpec {
        // Non-zero when any diagnostic is an error.
        ToolSpec::new(NAME, "bicep")
            .with_env(&["HOME", "DOTNET_ROOT"])
            .with_findings_exit_codes(&[1])
            .with_primary_dimension(Dimension::Structure)
    }

    fn applies_to(&self, target: &ValidationTarget) -> bool {
        target.kind == ArtifactKind::Template
            && target.path.extension().is_some_and(|e| e == "bicep")
    }

    fn dimensions(&self) -> &'static [Dimension] {
        COVERED
    }

    fn arguments(&self, ctx: &ValidatorContext<'_>) -> Result<Invocation, Rejection> {
        Ok(Invocation::new(vec![
            ToolArg::flag("lint"),
            ToolArg::path(ctx.path),
        ]))
    }

    fn parse(
        &self,
        result: &ProcessResult,
        ctx: &ValidatorContext<'_>,
    ) -> Result<ParsedOutput, ParseError> {
        let base = ctx.base_dir();
        let mut out = ParsedOutput::default();
        let mut unrecognized = 0usize;

        for line in result.stderr.lines().chain(result.stdout.lines()) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(caps) = diagnostic().captures(line) else {
                if diagnostic_prefix().is_match(line) {
                    out.dropped += 1;
                } else {
                    unrecognized += 1;
                }
                continue;
            };

            let code = &caps["code"];
            let severity = lookup(SEVERITIES, &caps["level"], Severity::Info);
            let line_no = caps["line"].parse::<u32>().ok();
            out.findings.push(
                tool_finding(
                    NAME,
                    code,
                    severity,
                    lookup(DIMENSIONS, code, Dimension::Structure),
                    &caps["msg"],
                )
                .with_location(
                    SourceLocation::file(report_path(&caps["file"], &base)).with_line(line_no),
                ),
            );
        }

        if out.findings.is_empty() && out.dropped == 0 && unrecognized > 0 {
            return Err(ParseError::malformed(
                "bicep diagnostics",
                format!("{} lines with no diagnostic", unrecognized),
            ));
        }

        debug!(
            "bicep-lint: {} findings, {} lines dropped",
            out.findings.len(),
            out.dropped
        );
        Ok(out)
    }
}
