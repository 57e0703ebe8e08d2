//! Scripts handed to an interpreter as a single argv element
//!
//! Some validators are only reachable through an interpreter (arm-ttk is a
//! PowerShell module). [`ScriptBuilder`] is the one place where untrusted
//! values meet script text: fixed fragments must be `&'static str`, and
//! every runtime value goes through [`escape_for_embedded_string`] and is
//! wrapped in the dialect's quotes.

use crate::input::{escape_for_embedded_string, QuoteDialect, Rejection};

/// A finished script. Only [`ScriptBuilder::build`] can make one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedScript(String);

impl EmbeddedScript {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    dialect: QuoteDialect,
    text: String,
}

impl ScriptBuilder {
    pub fn powershell() -> Self {
        Self {
            dialect: QuoteDialect::PowerShellSingle,
            text: String::new(),
        }
    }

    pub fn posix() -> Self {
        Self {
            dialect: QuoteDialect::PosixSingle,
            text: String::new(),
        }
    }

    /// Append a fixed fragment of script text
    pub fn raw(mut self, fragment: &'static str) -> Self {
        self.text.push_str(fragment);
        self
    }

    /// Append `value` as one quoted literal
    pub fn quoted(mut self, value: &str) -> Result<Self, Rejection> {
        let escaped = escape_for_embedded_string(value, self.dialect)?;
        self.text.push('\'');
        self.text.push_str(&escaped);
        self.text.push('\'');
        Ok(self)
    }

    /// Append a comma-separated list of quoted literals (`'a','b'`)
    pub fn quoted_list<S: AsRef<str>>(mut self, values: &[S]) -> Result<Self, Rejection> {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.text.push(',');
            }
            self = self.quoted(value.as_ref())?;
        }
        Ok(self)
    }

    pub fn build(self) -> EmbeddedScript {
        EmbeddedScript(self.text)
    }
}
