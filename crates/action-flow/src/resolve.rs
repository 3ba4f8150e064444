//! Value resolution for value-bearing steps
//!
//! A [`ValueSpec`] yields its value from, in order: an explicit `value`
//! (string values have `{{ path }}` placeholders substituted), a `leadKey`
//! deep lookup, or nothing. The optional value map then translates the raw
//! value into what the target platform expects.
//!
//! Placeholders read lead paths, plus `credentials.username` and
//! `credentials.password` from the item's credentials. Anything derived from
//! the password is flagged as sensitive so it can be redacted from logs.

use leadflow_core_types::Credentials;
use serde_json::Value;

use crate::types::ValueSpec;

const CREDENTIALS_PREFIX: &str = "credentials.";

/// Data visible to templates and lookups while one item executes.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionScope<'a> {
    pub lead: &'a Value,
    pub credentials: Option<&'a Credentials>,
}

impl<'a> ResolutionScope<'a> {
    pub fn new(lead: &'a Value) -> Self {
        Self {
            lead,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: &'a Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Resolve a path, returning the value and whether it is secret.
    fn get(&self, path: &str) -> Option<(Value, bool)> {
        match path.strip_prefix(CREDENTIALS_PREFIX) {
            Some("username") => self
                .credentials
                .map(|creds| (Value::String(creds.username.clone()), false)),
            Some("password") => self
                .credentials
                .map(|creds| (Value::String(creds.password.clone()), true)),
            Some(_) => None,
            None => lookup(self.lead, path).map(|value| (value.clone(), false)),
        }
    }
}

/// Outcome of [`resolve_and_map`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Value before translation; `None` when nothing resolved
    pub raw: Option<Value>,
    /// Value after translation
    pub mapped: Option<Value>,
    /// Derived from a secret and must not be logged
    pub sensitive: bool,
}

/// Dot-path lookup. Numeric segments index into arrays.
pub fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// Resolve the raw value of a value spec.
pub fn resolve(spec: &ValueSpec, scope: &ResolutionScope<'_>) -> Option<Value> {
    resolve_raw(spec, scope).0
}

fn resolve_raw(spec: &ValueSpec, scope: &ResolutionScope<'_>) -> (Option<Value>, bool) {
    if let Some(value) = &spec.value {
        return match value {
            Value::String(text) if has_placeholders(text) => {
                let (text, sensitive) = interpolate(text, scope);
                (Some(Value::String(text)), sensitive)
            }
            other => (Some(other.clone()), false),
        };
    }
    if let Some(path) = &spec.lead_key {
        return match scope.get(path) {
            Some((value, sensitive)) => (Some(value), sensitive),
            None => (None, false),
        };
    }
    (None, false)
}

/// Resolve a value spec and translate the result through its value map.
pub fn resolve_and_map(spec: &ValueSpec, scope: &ResolutionScope<'_>) -> Resolved {
    let (raw, sensitive) = resolve_raw(spec, scope);
    let mapped = match &spec.value_map {
        Some(map) => map.lookup(raw.as_ref()).cloned().or_else(|| raw.clone()),
        None => raw.clone(),
    };
    Resolved {
        raw,
        mapped,
        sensitive,
    }
}

pub fn has_placeholders(text: &str) -> bool {
    text.find("{{")
        .is_some_and(|start| text[start + 2..].contains("}}"))
}

/// Substitute every `{{ path }}` in `template`. Missing paths become empty
/// strings; an unterminated placeholder is kept verbatim.
pub fn interpolate(template: &str, scope: &ResolutionScope<'_>) -> (String, bool) {
    let mut output = String::with_capacity(template.len());
    let mut remaining = template;
    let mut sensitive = false;

    while let Some(start) = remaining.find("{{") {
        let (before, after) = remaining.split_at(start);
        output.push_str(before);
        let Some(end) = after.find("}}") else {
            output.push_str(after);
            return (output, sensitive);
        };
        let path = after[2..end].trim();
        if let Some((value, secret)) = scope.get(path) {
            sensitive |= secret;
            output.push_str(&scalar_text(Some(&value)));
        }
        remaining = &after[end + 2..];
    }
    output.push_str(remaining);
    (output, sensitive)
}

/// Text handed to fill/select. Absent and null become empty.
pub fn scalar_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Checkbox state for a toggle step.
///
/// A toggle without any value source means "check it"; otherwise booleans
/// are used as-is, common affirmative strings and non-zero numbers are true,
/// everything else (including null) is false.
pub fn toggle_state(spec: &ValueSpec, mapped: Option<&Value>) -> bool {
    if spec.is_empty() && mapped.is_none() {
        return true;
    }
    match mapped {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on" | "oui" | "checked"
        ),
        _ => false,
    }
}

/// Whether a template or lead key reads from the credentials namespace.
pub fn mentions_credentials(text: &str) -> bool {
    text.contains(CREDENTIALS_PREFIX)
}
