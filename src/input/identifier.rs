//! Whitelist validation of identifiers passed to validators
//!
//! Each kind has one documented pattern; there is no permissive fallback.

use super::{sanitize_for_display, Rejection};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

static UUID: OnceLock<Regex> = OnceLock::new();
static RESOURCE_GROUP: OnceLock<Regex> = OnceLock::new();
static POLICY_NAME: OnceLock<Regex> = OnceLock::new();
static EMAIL: OnceLock<Regex> = OnceLock::new();
static TEST_NAME: OnceLock<Regex> = OnceLock::new();

fn uuid() -> &'static Regex {
    UUID.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("valid regex")
    })
}

fn resource_group() -> &'static Regex {
    RESOURCE_GROUP.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{1,90}$").expect("valid regex"))
}

fn policy_name() -> &'static Regex {
    POLICY_NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{1,128}$").expect("valid regex"))
}

fn email() -> &'static Regex {
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]{1,64}@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,63}$")
            .expect("valid regex")
    })
}

fn test_name() -> &'static Regex {
    TEST_NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 ._-]{0,127}$").expect("valid regex"))
}

/// Kinds of identifiers that may reach a subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentifierKind {
    /// Cloud subscription id: UUID
    SubscriptionId,
    /// Directory tenant id: UUID
    TenantId,
    /// Resource group: 1-90 of `[A-Za-z0-9._-]`, not ending in `.`
    ResourceGroup,
    /// Policy assignment/definition name: 1-128 of `[A-Za-z0-9._-]`
    PolicyName,
    /// Publisher contact email, at most 254 characters
    Email,
    /// Validator test name: alphanumeric first, then `[A-Za-z0-9 ._-]`, at most 128
    TestName,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::SubscriptionId => "subscription id",
            IdentifierKind::TenantId => "tenant id",
            IdentifierKind::ResourceGroup => "resource group",
            IdentifierKind::PolicyName => "policy name",
            IdentifierKind::Email => "email",
            IdentifierKind::TestName => "test name",
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            IdentifierKind::SubscriptionId | IdentifierKind::TenantId => uuid(),
            IdentifierKind::ResourceGroup => resource_group(),
            IdentifierKind::PolicyName => policy_name(),
            IdentifierKind::Email => email(),
            IdentifierKind::TestName => test_name(),
        }
    }
}

/// An identifier that passed its kind's whitelist
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identifier {
    kind: IdentifierKind,
    value: String,
}

impl Identifier {
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// Validate `raw` against the whitelist for `kind`
pub fn validate_identifier(raw: &str, kind: IdentifierKind) -> Result<Identifier, Rejection> {
    let label = kind.as_str();
    let reject = |reason: &str| Rejection::InvalidFormat {
        kind: label,
        reason: format!("'{}' {}", sanitize_for_display(raw), reason),
    };

    if !kind.pattern().is_match(raw) {
        return Err(reject("does not match the allowed pattern"));
    }

    match kind {
        IdentifierKind::ResourceGroup if raw.ends_with('.') => {
            return Err(reject("must not end with a period"));
        }
        IdentifierKind::Email if raw.len() > 254 => {
            return Err(reject("is longer than 254 characters"));
        }
        IdentifierKind::TestName if raw.ends_with(' ') => {
            return Err(reject("must not end with a space"));
        }
        _ => {}
    }

    Ok(Identifier {
        kind,
        value: raw.to_string(),
    })
}
