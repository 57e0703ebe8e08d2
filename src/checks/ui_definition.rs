//! `createUiDefinition.json` rules

use super::{schema, ArtifactDocument, Check};
use crate::models::{ArtifactKind, Dimension, Finding, Severity};
use serde_json::Value as JsonValue;

const HANDLER: &str = "Microsoft.Azure.CreateUIDef";
const PASSWORD_BOX: &str = "Microsoft.Common.PasswordBox";

const COVERED: &[Dimension] = &[Dimension::Compliance, Dimension::Structure, Dimension::Security];

/// An element and its JSON pointer
struct Element<'a> {
    pointer: String,
    value: &'a JsonValue,
}

/// Every UI element in `basics`, each step, and nested sections
fn elements(doc: &JsonValue) -> Vec<Element<'_>> {
    fn walk<'a>(list: &'a JsonValue, prefix: &str, out: &mut Vec<Element<'a>>) {
        let Some(items) = list.as_array() else {
            return;
        };
        for (i, value) in items.iter().enumerate() {
            let pointer = format!("{}/{}", prefix, i);
            let nested = value.get("elements");
            out.push(Element {
                pointer: pointer.clone(),
                value,
            });
            if let Some(nested) = nested {
                walk(nested, &format!("{}/elements", pointer), out);
            }
        }
    }

    let mut out = Vec::new();
    if let Some(basics) = doc.pointer("/parameters/basics") {
        walk(basics, "/parameters/basics", &mut out);
    }
    if let Some(steps) = doc.pointer("/parameters/steps").and_then(JsonValue::as_array) {
        for (i, step) in steps.iter().enumerate() {
            if let Some(list) = step.get("elements") {
                walk(list, &format!("/parameters/steps/{}/elements", i), &mut out);
            }
        }
    }
    out
}

/// Output keys the UI definition hands to the template
pub fn output_names(doc: &JsonValue) -> Vec<&str> {
    doc.pointer("/parameters/outputs")
        .and_then(JsonValue::as_object)
        .map(|o| o.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

pub struct UiDefinitionCheck;

impl Check for UiDefinitionCheck {
    fn name(&self) -> &'static str {
        "ui-definition"
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::UiDefinition
    }

    fn dimensions(&self) -> &'static [Dimension] {
        COVERED
    }

    fn run(&self, doc: &ArtifactDocument) -> Vec<Finding> {
        let mut out = Vec::new();

        let valid_schema = schema(&doc.json)
            .is_some_and(|s| s.to_lowercase().contains("createuidefinition"));
        if !valid_schema {
            out.push(
                doc.finding(
                    "ui-schema-missing",
                    Severity::Error,
                    Dimension::Compliance,
                    "UI definition does not declare the CreateUIDefinition $schema",
                    "/$schema",
                    Some("$schema"),
                )
                .with_remediation(
                    "Set $schema to https://schema.management.azure.com/schemas/0.1.2-preview/CreateUIDefinition.MultiVm.json#",
                ),
            );
        }

        let handler = doc.json.get("handler").and_then(JsonValue::as_str);
        if handler != Some(HANDLER) {
            out.push(
                doc.finding(
                    "ui-handler-invalid",
                    Severity::Error,
                    Dimension::Compliance,
                    format!("handler must be {}", HANDLER),
                    "/handler",
                    Some("handler"),
                )
                .with_remediation(format!("Set handler to {}", HANDLER)),
            );
        }

        let outputs = doc.json.pointer("/parameters/outputs");
        match outputs.and_then(JsonValue::as_object) {
            None => out.push(
                doc.finding(
                    "ui-outputs-missing",
                    Severity::Error,
                    Dimension::Structure,
                    "UI definition has no parameters.outputs object",
                    "/parameters/outputs",
                    Some("outputs"),
                )
                .with_remediation("Map every template parameter in parameters.outputs"),
            ),
            Some(map) => {
                if !map.keys().any(|k| k.eq_ignore_ascii_case("location")) {
                    out.push(
                        doc.finding(
                            "ui-location-output-missing",
                            Severity::Warning,
                            Dimension::Compliance,
                            "Outputs do not pass a location to the template",
                            "/parameters/outputs",
                            Some("outputs"),
                        )
                        .with_remediation("Add \"location\": \"[location()]\" to the outputs"),
                    );
                }
            }
        }

        for element in elements(&doc.json) {
            let is_password = element
                .value
                .get("type")
                .and_then(JsonValue::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case(PASSWORD_BOX));
            if !is_password {
                continue;
            }
            let constrained = element
                .value
                .pointer("/constraints/regex")
                .and_then(JsonValue::as_str)
                .is_some_and(|r| !r.is_empty());
            if !constrained {
                let name = element.value.get("name").and_then(JsonValue::as_str);
                out.push(
                    doc.finding(
                        "ui-password-unconstrained",
                        Severity::Warning,
                        Dimension::Security,
                        format!(
                            "Password box '{}' has no complexity constraint",
                            name.unwrap_or("?")
                        ),
                        &element.pointer,
                        name,
                    )
                    .with_remediation("Add constraints.regex and validationMessage for password complexity"),
                );
            }
        }

        out
    }
}
