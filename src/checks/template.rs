//! Deployment template (`mainTemplate.json`) rules
//!
//! Covers the marketplace certification basics: schema and content
//! version, parameter hygiene, secure parameters and outputs, API
//! versions, hardcoded locations and sizes, and storage account transport
//! security.

use super::{is_expression, pointer_token, schema, ArtifactDocument, Check};
use crate::models::{ArtifactKind, Dimension, Finding, Severity};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

static CONTENT_VERSION: OnceLock<Regex> = OnceLock::new();

fn content_version() -> &'static Regex {
    CONTENT_VERSION.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+$").expect("valid regex"))
}

const STORAGE_ACCOUNT: &str = "Microsoft.Storage/storageAccounts";
const VIRTUAL_MACHINE: &str = "Microsoft.Compute/virtualMachines";
const WEAK_TLS: &[&str] = &["TLS1_0", "TLS1_1"];

/// A resource and its JSON pointer, including nested child resources
pub struct ResourceRef<'a> {
    pub pointer: String,
    pub value: &'a JsonValue,
}

impl ResourceRef<'_> {
    pub fn resource_type(&self) -> Option<&str> {
        self.value.get("type").and_then(JsonValue::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.value.get("name").and_then(JsonValue::as_str)
    }

    fn is_type(&self, expected: &str) -> bool {
        self.resource_type()
            .is_some_and(|t| t.eq_ignore_ascii_case(expected))
    }

    fn label(&self) -> String {
        match (self.resource_type(), self.name()) {
            (Some(t), Some(n)) => format!("{} '{}'", t, n),
            (Some(t), None) => t.to_string(),
            _ => format!("resource at {}", self.pointer),
        }
    }
}

/// Every resource in the template, depth first
pub fn resources(template: &JsonValue) -> Vec<ResourceRef<'_>> {
    fn walk<'a>(list: &'a JsonValue, prefix: &str, out: &mut Vec<ResourceRef<'a>>) {
        let Some(items) = list.as_array() else {
            return;
        };
        for (i, value) in items.iter().enumerate() {
            let pointer = format!("{}/{}", prefix, i);
            if let Some(children) = value.get("resources") {
                out.push(ResourceRef {
                    pointer: pointer.clone(),
                    value,
                });
                walk(children, &format!("{}/resources", pointer), out);
            } else {
                out.push(ResourceRef { pointer, value });
            }
        }
    }

    let mut out = Vec::new();
    if let Some(list) = template.get("resources") {
        walk(list, "/resources", &mut out);
    }
    out
}

/// Template parameters in declaration order
pub fn parameters(template: &JsonValue) -> Vec<(&str, &JsonValue)> {
    template
        .get("parameters")
        .and_then(JsonValue::as_object)
        .map(|params| params.iter().map(|(k, v)| (k.as_str(), v)).collect())
        .unwrap_or_default()
}

fn is_secure(param: &JsonValue) -> bool {
    param
        .get("type")
        .and_then(JsonValue::as_str)
        .is_some_and(|t| {
            t.eq_ignore_ascii_case("securestring") || t.eq_ignore_ascii_case("secureobject")
        })
}

fn parameter_ref(name: &str) -> String {
    format!("parameters('{}')", name.to_lowercase())
}

pub struct TemplateCheck;

impl TemplateCheck {
    fn schema_and_version(doc: &ArtifactDocument, out: &mut Vec<Finding>) {
        let valid_schema = schema(&doc.json)
            .is_some_and(|s| s.to_lowercase().contains("deploymenttemplate.json"));
        if !valid_schema {
            out.push(
                doc.finding(
                    "template-schema-missing",
                    Severity::Error,
                    Dimension::Compliance,
                    "Template does not declare the deploymentTemplate.json $schema",
                    "/$schema",
                    Some("$schema"),
                )
                .with_remediation(
                    "Set $schema to https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
                ),
            );
        }

        let valid_version = doc
            .json
            .get("contentVersion")
            .and_then(JsonValue::as_str)
            .is_some_and(|v| content_version().is_match(v));
        if !valid_version {
            out.push(
                doc.finding(
                    "template-content-version-missing",
                    Severity::Warning,
                    Dimension::Compliance,
                    "Template has no valid contentVersion",
                    "/contentVersion",
                    Some("contentVersion"),
                )
                .with_remediation("Set contentVersion to a four-part version such as 1.0.0.0"),
            );
        }
    }

    fn parameter_rules(doc: &ArtifactDocument, out: &mut Vec<Finding>) {
        let params = parameters(&doc.json);
        if params.is_empty() {
            return;
        }

        let haystack = ["variables", "resources", "outputs", "functions"]
            .iter()
            .filter_map(|section| doc.json.get(*section))
            .map(|v| v.to_string().to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");

        for (name, param) in params {
            let pointer = format!("/parameters/{}", pointer_token(name));

            let described = param
                .pointer("/metadata/description")
                .and_then(JsonValue::as_str)
                .is_some_and(|d| !d.trim().is_empty());
            if !described {
                out.push(
                    doc.finding(
                        "parameter-missing-description",
                        Severity::Warning,
                        Dimension::Structure,
                        format!("Parameter '{}' has no metadata.description", name),
                        &pointer,
                        Some(name),
                    )
                    .with_remediation("Add metadata.description so the portal can explain the parameter"),
                );
            }

            if !haystack.contains(&parameter_ref(name)) {
                out.push(
                    doc.finding(
                        "parameter-unused",
                        Severity::Warning,
                        Dimension::Structure,
                        format!("Parameter '{}' is never referenced", name),
                        &pointer,
                        Some(name),
                    )
                    .with_remediation("Remove the parameter or reference it"),
                );
            }

            if is_secure(param) && has_literal_default(param) {
                out.push(
                    doc.finding(
                        "secure-parameter-default",
                        Severity::Error,
                        Dimension::Security,
                        format!("Secure parameter '{}' has a default value", name),
                        &pointer,
                        Some(name),
                    )
                    .with_remediation("Remove the defaultValue; secure values must be supplied at deployment"),
                );
            }

            if name.eq_ignore_ascii_case("location") {
                let literal = param
                    .get("defaultValue")
                    .and_then(JsonValue::as_str)
                    .is_some_and(|d| !is_expression(d));
                if literal {
                    out.push(
                        doc.finding(
                            "location-hardcoded",
                            Severity::Warning,
                            Dimension::Compliance,
                            "The location parameter defaults to a fixed region",
                            &pointer,
                            Some(name),
                        )
                        .with_remediation("Default location to [resourceGroup().location]"),
                    );
                }
            }
        }
    }

    fn output_rules(doc: &ArtifactDocument, out: &mut Vec<Finding>) {
        let Some(outputs) = doc.json.get("outputs").and_then(JsonValue::as_object) else {
            return;
        };
        let secure_refs: Vec<String> = parameters(&doc.json)
            .into_iter()
            .filter(|(_, p)| is_secure(p))
            .map(|(name, _)| parameter_ref(name))
            .collect();

        for (name, output) in outputs {
            let value = output
                .get("value")
                .map(|v| v.to_string().to_lowercase())
                .unwrap_or_default();
            let leaks = value.contains("listkeys(")
                || value.contains("listsecrets(")
                || value.contains("list(")
                || secure_refs.iter().any(|r| value.contains(r.as_str()));
            if leaks {
                out.push(
                    doc.finding(
                        "output-exposes-secret",
                        Severity::Error,
                        Dimension::Security,
                        format!("Output '{}' exposes a secret value", name),
                        &format!("/outputs/{}", pointer_token(name)),
                        Some(name.as_str()),
                    )
                    .with_remediation("Do not return keys or secure parameters from a template"),
                );
            }
        }
    }

    fn resource_rules(doc: &ArtifactDocument, out: &mut Vec<Finding>) {
        for resource in resources(&doc.json) {
            let needle = resource.name();
            let label = resource.label();

            let has_api_version = resource
                .value
                .get("apiVersion")
                .and_then(JsonValue::as_str)
                .is_some_and(|v| !v.trim().is_empty());
            if !has_api_version {
                out.push(
                    doc.finding(
                        "resource-missing-api-version",
                        Severity::Error,
                        Dimension::Structure,
                        format!("{} has no apiVersion", label),
                        &resource.pointer,
                        needle,
                    )
                    .with_remediation("Pin an explicit, recent apiVersion for the resource type"),
                );
            }

            if let Some(location) = resource.value.get("location").and_then(JsonValue::as_str) {
                if !is_expression(location) && !location.eq_ignore_ascii_case("global") {
                    out.push(
                        doc.finding(
                            "location-hardcoded",
                            Severity::Warning,
                            Dimension::Compliance,
                            format!("{} has a hardcoded location '{}'", label, location),
                            &format!("{}/location", resource.pointer),
                            needle,
                        )
                        .with_remediation("Use [parameters('location')]"),
                    );
                }
            }

            if resource.is_type(STORAGE_ACCOUNT) {
                Self::storage_rules(doc, &resource, out);
            }

            if resource.is_type(VIRTUAL_MACHINE) {
                let size = resource
                    .value
                    .pointer("/properties/hardwareProfile/vmSize")
                    .and_then(JsonValue::as_str);
                if let Some(size) = size.filter(|s| !is_expression(s)) {
                    out.push(
                        doc.finding(
                            "vm-size-hardcoded",
                            Severity::Warning,
                            Dimension::Cost,
                            format!("{} uses fixed size '{}'", label, size),
                            &format!("{}/properties/hardwareProfile/vmSize", resource.pointer),
                            needle,
                        )
                        .with_remediation("Expose vmSize as a parameter so buyers can choose"),
                    );
                }
            }

            if resource.value.get("tags").is_none() {
                out.push(
                    doc.finding(
                        "resource-missing-tags",
                        Severity::Info,
                        Dimension::Cost,
                        format!("{} has no tags", label),
                        &resource.pointer,
                        needle,
                    )
                    .with_remediation("Add tags so buyers can attribute cost"),
                );
            }

            let serial = resource
                .value
                .pointer("/copy/mode")
                .and_then(JsonValue::as_str)
                .is_some_and(|m| m.eq_ignore_ascii_case("serial"));
            if serial {
                out.push(
                    doc.finding(
                        "copy-loop-serial",
                        Severity::Info,
                        Dimension::Performance,
                        format!("{} deploys its copy loop serially", label),
                        &format!("{}/copy/mode", resource.pointer),
                        needle,
                    )
                    .with_remediation("Use parallel copy mode unless ordering is required"),
                );
            }
        }
    }

    fn storage_rules(doc: &ArtifactDocument, resource: &ResourceRef<'_>, out: &mut Vec<Finding>) {
        let label = resource.label();
        let https_only = resource
            .value
            .pointer("/properties/supportsHttpsTrafficOnly")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        if !https_only {
            out.push(
                doc.finding(
                    "storage-https-only-missing",
                    Severity::Error,
                    Dimension::Security,
                    format!("{} does not enforce HTTPS-only traffic", label),
                    &resource.pointer,
                    resource.name(),
                )
                .with_remediation("Set properties.supportsHttpsTrafficOnly to true"),
            );
        }

        let tls = resource
            .value
            .pointer("/properties/minimumTlsVersion")
            .and_then(JsonValue::as_str);
        let weak = match tls {
            None => true,
            Some(v) => WEAK_TLS.iter().any(|w| w.eq_ignore_ascii_case(v)),
        };
        if weak {
            out.push(
                doc.finding(
                    "storage-min-tls-weak",
                    Severity::Warning,
                    Dimension::Security,
                    format!("{} allows TLS older than 1.2", label),
                    &resource.pointer,
                    resource.name(),
                )
                .with_remediation("Set properties.minimumTlsVersion to TLS1_2"),
            );
        }
    }
}

/// A default a secure parameter may not have. Empty values and generated
/// GUIDs are allowed.
fn has_literal_default(param: &JsonValue) -> bool {
    match param.get("defaultValue") {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::String(s)) => !s.is_empty() && !s.to_lowercase().contains("newguid()"),
        Some(JsonValue::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

impl Check for TemplateCheck {
    fn name(&self) -> &'static str {
        "template"
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Template
    }

    fn dimensions(&self) -> &'static [Dimension] {
        &Dimension::ALL
    }

    fn run(&self, doc: &ArtifactDocument) -> Vec<Finding> {
        let mut out = Vec::new();
        Self::schema_and_version(doc, &mut out);
        Self::parameter_rules(doc, &mut out);
        Self::output_rules(doc, &mut out);
        Self::resource_rules(doc, &mut out);
        out
    }
}
