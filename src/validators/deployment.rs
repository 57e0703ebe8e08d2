//! Deployment validation adapter
//!
//! Runs `az deployment group validate` against a configured subscription
//! and resource group. Only the exit code is interpreted; on failure the
//! captured stderr is attached to the finding as context.

use super::{tool_finding, Invocation, ParseError, ParsedOutput, Validator, ValidatorContext};
use crate::input::{sanitize_for_display, validate_identifier, IdentifierKind, Rejection};
use crate::models::{ArtifactKind, Dimension, Severity, SourceLocation, ValidationTarget};
use crate::process::{ProcessResult, SecretChannel, ToolArg, ToolSpec};

pub const NAME: &str = "deployment-validate";

/// The template file inside a package root
const MAIN_TEMPLATE: &str = "mainTemplate.json";

const COVERED: &[Dimension] = &[Dimension::Compliance];

pub struct DeploymentValidator;

impl Validator for DeploymentValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(NAME, "az")
            .with_env(&["HOME", "AZURE_CONFIG_DIR", "AZURE_CLIENT_ID", "AZURE_TENANT_ID"])
            .with_secret_channel(SecretChannel::Env("AZURE_CLIENT_SECRET"))
            .with_findings_exit_codes(&[1])
            .with_primary_dimension(Dimension::Compliance)
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
        let deployment = &ctx.policy.deployment;
        let (Some(subscription), Some(group)) =
            (&deployment.subscription_id, &deployment.resource_group)
        else {
            return Err(Rejection::invalid(
                "deployment",
                "deployment.subscription_id and deployment.resource_group must be set",
            ));
        };
        let subscription = validate_identifier(subscription, IdentifierKind::SubscriptionId)?;
        let group = validate_identifier(group, IdentifierKind::ResourceGroup)?;

        let template = match ctx.target.kind {
            ArtifactKind::PackageRoot => ctx.path.child(MAIN_TEMPLATE)?,
            _ => ctx.path.clone(),
        };

        Ok(Invocation {
            argv: vec![
                ToolArg::flag("deployment"),
                ToolArg::flag("group"),
                ToolArg::flag("validate"),
                ToolArg::flag("--subscription"),
                ToolArg::ident(&subscription),
                ToolArg::flag("--resource-group"),
                ToolArg::ident(&group),
                ToolArg::flag("--template-file"),
                ToolArg::path(&template),
                ToolArg::flag("--only-show-errors"),
            ],
            secret: ctx.user.client_secret().cloned(),
        })
    }

    fn parse(
        &self,
        result: &ProcessResult,
        ctx: &ValidatorContext<'_>,
    ) -> Result<ParsedOutput, ParseError> {
        let mut out = ParsedOutput::default();
        if result.exit_code != Some(1) {
            return Ok(out);
        }

        let captured = if result.stderr.trim().is_empty() {
            &result.stdout
        } else {
            &result.stderr
        };
        let file = match ctx.target.kind {
            ArtifactKind::PackageRoot => MAIN_TEMPLATE.to_string(),
            _ => ctx
                .path
                .as_path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        out.findings.push(
            tool_finding(
                NAME,
                "deployment-validation-failed",
                Severity::Error,
                Dimension::Compliance,
                "Azure Resource Manager rejected the template during deployment validation",
            )
            .with_location(SourceLocation::file(sanitize_for_display(&file)))
            .with_remediation("Fix the errors reported by the deployment validation and re-run")
            .with_context(sanitize_for_display(captured.trim())),
        );
        Ok(out)
    }
}
