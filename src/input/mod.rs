//! Input validation framework
//!
//! Every value that crosses a process or file-system boundary goes through
//! this module first:
//! - paths are canonicalized and confined to an allow-list of roots
//! - identifiers are matched against a strict per-kind whitelist
//! - anything shown to a human is sanitized for display
//! - values embedded in a validator's script are escaped for its dialect
//!
//! Validation never "warns and proceeds": every failure is a [`Rejection`]
//! the caller must handle.

mod identifier;
mod path;
mod sanitize;

pub use identifier::{validate_identifier, Identifier, IdentifierKind};
pub use path::{CanonicalPath, PathGuard};
pub use sanitize::{escape_for_embedded_string, sanitize_for_display, QuoteDialect};

use thiserror::Error;

/// Typed rejection of an untrusted input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("path traversal sequence in '{0}'")]
    PathTraversal(String),

    #[error("'{0}' resolves outside every allowed root")]
    OutsideAllowedRoot(String),

    #[error("'{0}' does not exist")]
    NotFound(String),

    #[error("invalid {kind}: {reason}")]
    InvalidFormat { kind: &'static str, reason: String },
}

impl Rejection {
    pub(crate) fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Rejection::InvalidFormat {
            kind,
            reason: reason.into(),
        }
    }
}
