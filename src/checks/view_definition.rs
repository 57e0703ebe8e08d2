//! `viewDefinition.json` rules for managed application views

use super::{schema, ArtifactDocument, Check};
use crate::models::{ArtifactKind, Dimension, Finding, Severity};
use serde_json::Value as JsonValue;

const VIEW_KINDS: &[&str] = &["Overview", "Metrics", "CustomResources", "Associations"];

const COVERED: &[Dimension] = &[Dimension::Structure, Dimension::Compliance];

pub struct ViewDefinitionCheck;

impl Check for ViewDefinitionCheck {
    fn name(&self) -> &'static str {
        "view-definition"
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::ViewDefinition
    }

    fn dimensions(&self) -> &'static [Dimension] {
        COVERED
    }

    fn run(&self, doc: &ArtifactDocument) -> Vec<Finding> {
        let mut out = Vec::new();

        if !schema(&doc.json).is_some_and(|s| s.to_lowercase().contains("viewdefinition")) {
            out.push(
                doc.finding(
                    "view-schema-missing",
                    Severity::Error,
                    Dimension::Compliance,
                    "View definition does not declare the viewDefinition $schema",
                    "/$schema",
                    Some("$schema"),
                )
                .with_remediation(
                    "Set $schema to https://schema.management.azure.com/schemas/viewdefinition/0.0.1-preview/ViewDefinition.json#",
                ),
            );
        }

        let Some(views) = doc.json.get("views").and_then(JsonValue::as_array) else {
            out.push(
                doc.finding(
                    "view-kind-invalid",
                    Severity::Error,
                    Dimension::Structure,
                    "View definition has no views array",
                    "/views",
                    Some("views"),
                )
                .with_remediation("Add a views array"),
            );
            return out;
        };

        for (i, view) in views.iter().enumerate() {
            let kind = view.get("kind").and_then(JsonValue::as_str);
            if kind.is_some_and(|k| VIEW_KINDS.contains(&k)) {
                continue;
            }
            out.push(
                doc.finding(
                    "view-kind-invalid",
                    Severity::Error,
                    Dimension::Structure,
                    format!("View {} has kind '{}'", i, kind.unwrap_or("")),
                    &format!("/views/{}/kind", i),
                    kind,
                )
                .with_remediation(format!("Use one of: {}", VIEW_KINDS.join(", "))),
            );
        }
        out
    }
}
