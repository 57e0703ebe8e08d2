//! The optimization action catalog
//!
//! Every action is keyed to the built-in rule it resolves and edits one
//! JSON pointer. Applying an action whose postcondition already holds is a
//! no-op, so a second pass over a fixed artifact changes nothing.

use crate::config::PolicyConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

pub const DEFAULT_CONTENT_VERSION: &str = "1.0.0.0";
pub const MIN_TLS_VERSION: &str = "TLS1_2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    AddParameterDescription,
    InjectApiVersion,
    EnforceStorageHttps,
    RaiseStorageMinTls,
    AddContentVersion,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::AddParameterDescription,
        ActionKind::InjectApiVersion,
        ActionKind::EnforceStorageHttps,
        ActionKind::RaiseStorageMinTls,
        ActionKind::AddContentVersion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::AddParameterDescription => "add-parameter-description",
            ActionKind::InjectApiVersion => "inject-api-version",
            ActionKind::EnforceStorageHttps => "enforce-storage-https",
            ActionKind::RaiseStorageMinTls => "raise-storage-min-tls",
            ActionKind::AddContentVersion => "add-content-version",
        }
    }

    /// The finding rule that must be present for this action to fire
    pub fn precondition(&self) -> &'static str {
        match self {
            ActionKind::AddParameterDescription => "parameter-missing-description",
            ActionKind::InjectApiVersion => "resource-missing-api-version",
            ActionKind::EnforceStorageHttps => "storage-https-only-missing",
            ActionKind::RaiseStorageMinTls => "storage-min-tls-weak",
            ActionKind::AddContentVersion => "template-content-version-missing",
        }
    }

    pub fn for_rule(rule: &str) -> Option<ActionKind> {
        Self::ALL.into_iter().find(|a| a.precondition() == rule)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One concrete edit: which value goes where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    /// Pointer of the value being set
    pub pointer: String,
    pub value: JsonValue,
}

/// Work out the edit for an action at `pointer` (the finding's location).
///
/// Returns `None` when the action cannot be applied here, e.g. a resource
/// type with no catalog API version.
pub fn plan(
    kind: ActionKind,
    doc: &JsonValue,
    pointer: &str,
    policy: &PolicyConfig,
) -> Option<Edit> {
    match kind {
        ActionKind::AddParameterDescription => {
            let name = unescape_token(pointer.strip_prefix("/parameters/")?);
            doc.pointer(pointer)?.as_object()?;
            Some(Edit {
                pointer: format!("{}/metadata/description", pointer),
                value: json!(humanize(&name)),
            })
        }
        ActionKind::InjectApiVersion => {
            let resource_type = doc.pointer(pointer)?.get("type")?.as_str()?;
            let version = policy.api_version_for(resource_type)?;
            Some(Edit {
                pointer: format!("{}/apiVersion", pointer),
                value: json!(version),
            })
        }
        ActionKind::EnforceStorageHttps => {
            doc.pointer(pointer)?.as_object()?;
            Some(Edit {
                pointer: format!("{}/properties/supportsHttpsTrafficOnly", pointer),
                value: json!(true),
            })
        }
        ActionKind::RaiseStorageMinTls => {
            doc.pointer(pointer)?.as_object()?;
            Some(Edit {
                pointer: format!("{}/properties/minimumTlsVersion", pointer),
                value: json!(MIN_TLS_VERSION),
            })
        }
        ActionKind::AddContentVersion => Some(Edit {
            pointer: "/contentVersion".to_string(),
            value: json!(DEFAULT_CONTENT_VERSION),
        }),
    }
}

/// Set `edit.value` at `edit.pointer`, creating intermediate objects.
///
/// Returns the previous value, or `None` if nothing changed because the
/// value is already in place or the path runs through a non-object.
pub fn apply(doc: &mut JsonValue, edit: &Edit) -> Option<Option<JsonValue>> {
    let (parent, key) = edit.pointer.rsplit_once('/')?;
    let key = unescape_token(key);
    let mut node = doc;
    for token in parent.split('/').skip(1) {
        let token = unescape_token(token);
        node = match node {
            JsonValue::Object(map) => map
                .entry(token)
                .or_insert_with(|| JsonValue::Object(Map::new())),
            JsonValue::Array(items) => items.get_mut(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    let map = node.as_object_mut()?;
    if map.get(&key) == Some(&edit.value) {
        return None;
    }
    Some(map.insert(key, edit.value.clone()))
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// `adminUsername` -> `Admin username`, `vmSKU` -> `Vm SKU`
pub fn humanize(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(i + 1);
        let boundary = c.is_uppercase()
            && !current.is_empty()
            && (prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit())
                || next.is_some_and(|n| n.is_lowercase()));
        if boundary {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let acronym = word.len() > 1 && word.chars().all(|c| !c.is_lowercase());
            if acronym {
                word.clone()
            } else if i == 0 {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }
            } else {
                word.to_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
