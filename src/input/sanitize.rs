//! Display sanitization and quoted-literal escaping

use super::Rejection;

/// Longest string `sanitize_for_display` will return, in characters
const MAX_DISPLAY_CHARS: usize = 512;

/// Characters with meaning to a shell or to a script interpreter
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '\'', '"', '<', '>', '\\',
];

/// Make an untrusted value safe to show in logs and reports.
///
/// Strips control characters, shell metacharacters and traversal
/// sequences (`../`, `..\`), then bounds the length. Forward slashes are
/// kept so relative file paths stay readable. Applied even to values that
/// already passed validation.
pub fn sanitize_for_display(raw: &str) -> String {
    let mut without_traversal = raw.to_string();
    // Repeat until stable: removing one sequence can expose another (`....//`).
    while without_traversal.contains("../") || without_traversal.contains("..\\") {
        without_traversal = without_traversal.replace("../", "").replace("..\\", "");
    }

    let mut out = String::with_capacity(without_traversal.len().min(MAX_DISPLAY_CHARS));
    let mut count = 0;
    for c in without_traversal.chars() {
        if c.is_control() || SHELL_METACHARACTERS.contains(&c) {
            continue;
        }
        if count == MAX_DISPLAY_CHARS {
            out.push_str("...");
            break;
        }
        out.push(c);
        count += 1;
    }
    out
}

/// Quoting dialect of a script a validator is driven by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteDialect {
    /// PowerShell verbatim string `'...'`
    PowerShellSingle,
    /// POSIX shell single-quoted word `'...'`
    PosixSingle,
}

/// Escape `raw` so it can sit between the dialect's quote characters.
///
/// The caller adds the surrounding quotes. NUL bytes are rejected because
/// no dialect can represent them inside a command line.
pub fn escape_for_embedded_string(raw: &str, dialect: QuoteDialect) -> Result<String, Rejection> {
    if raw.contains('\0') {
        return Err(Rejection::invalid("embedded string", "contains a NUL byte"));
    }

    let mut out = String::with_capacity(raw.len() + 8);
    match dialect {
        QuoteDialect::PowerShellSingle => {
            for c in raw.chars() {
                // PowerShell treats the typographic single quotes as `'` too.
                if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
                    out.push(c);
                }
                out.push(c);
            }
        }
        QuoteDialect::PosixSingle => {
            for c in raw.chars() {
                if c == '\'' {
                    out.push_str("'\\''");
                } else {
                    out.push(c);
                }
            }
        }
    }
    Ok(out)
}
