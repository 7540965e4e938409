//! Credential macro parsing.
//!
//! Parameter values reference credentials with an inline macro:
//!
//! ```text
//! ${creds.get("db-cred").password}
//! ```
//!
//! The macro is usually embedded in a larger string (a connection URL, a
//! multi-line config block), so extraction searches for it rather than
//! matching the whole value.

use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::Value;

use crate::core::document::key_text;
use crate::core::domain::Field;
use crate::error::{Error, ErrorCode, Result};

/// A credential macro found in a parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRef {
    /// The macro exactly as written in the value.
    pub macro_text: String,
    pub id: String,
    pub field: Field,
}

impl CredentialRef {
    /// Literal spellings of this macro to search for across the tree.
    pub fn needles(&self) -> Vec<String> {
        let double = format!("${{creds.get(\"{}\").{}}}", self.id, self.field);
        let single = format!("${{creds.get('{}').{}}}", self.id, self.field);
        let mut needles = vec![self.macro_text.clone()];
        for candidate in [double, single] {
            if !needles.contains(&candidate) {
                needles.push(candidate);
            }
        }
        needles
    }
}

fn any_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\$\{creds\.get\(["']([^"']+)["']\)\.(username|password|secret)\}"#)
            .expect("static credential macro pattern")
    })
}

fn field_pattern(field: Field) -> &'static Regex {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        Field::ALL.map(|f| {
            Regex::new(&format!(
                r#"\$\{{creds\.get\(["']([^"']+)["']\)\.({})\}}"#,
                regex::escape(f.as_str())
            ))
            .expect("static credential macro pattern")
        })
    });
    let idx = Field::ALL
        .iter()
        .position(|f| *f == field)
        .unwrap_or_default();
    &patterns[idx]
}

/// Find the first credential macro in a string.
///
/// With `field` set, only macros bound to that field match.
pub fn find_macro(value: &str, field: Option<Field>) -> Option<CredentialRef> {
    let pattern = match field {
        Some(f) => field_pattern(f),
        None => any_field_pattern(),
    };
    let caps = pattern.captures(value)?;
    let field = caps.get(2)?.as_str().parse().ok()?;
    Some(CredentialRef {
        macro_text: caps.get(0)?.as_str().to_string(),
        id: caps.get(1)?.as_str().to_string(),
        field,
    })
}

/// Resolve the target key in a section and extract its credential macro.
///
/// `target_key` is either a key present verbatim in the section or a
/// dotted/indexed path such as `a.b[2].c`.
///
/// # Errors
///
/// - `Reference` if the key path does not resolve.
/// - `Type` if the value is not a string or holds no macro for `field`.
pub fn extract_credential(
    target_key: &str,
    section: &Value,
    field: Option<Field>,
) -> Result<CredentialRef> {
    let value = resolve_key(section, target_key)?;

    let text = value.as_str().ok_or_else(|| {
        Error::type_error(
            ErrorCode::InvalidDataType,
            format!(
                "expected a string value for parameter '{}', got {}",
                target_key,
                kind_of(value)
            ),
        )
    })?;

    find_macro(text, field).ok_or_else(|| {
        Error::type_error(
            ErrorCode::InvalidInput,
            match field {
                Some(f) => format!(
                    "parameter '{}' holds no credential macro for field '{}'",
                    target_key, f
                ),
                None => format!("parameter '{}' holds no credential macro", target_key),
            },
        )
    })
}

/// Resolve a plain key or a dotted/indexed key path.
pub fn resolve_key<'a>(section: &'a Value, target_key: &str) -> Result<&'a Value> {
    if let Some(value) = section.as_mapping().and_then(|m| m.get(target_key)) {
        return Ok(value);
    }
    if !target_key.contains('.') && !target_key.contains('[') {
        return Err(not_found(target_key));
    }

    let mut current = section;
    for segment in target_key.split('.') {
        let (name, indices) = parse_segment(segment).ok_or_else(|| {
            Error::reference(
                ErrorCode::InvalidInput,
                format!("invalid path segment '{}' in '{}'", segment, target_key),
            )
        })?;

        if !name.is_empty() {
            current = current
                .as_mapping()
                .and_then(|m| m.get(name))
                .ok_or_else(|| {
                    Error::reference(
                        ErrorCode::InvalidInput,
                        format!("missing key '{}' while resolving '{}'", name, target_key),
                    )
                })?;
        }

        for index in indices {
            let list = current.as_sequence().ok_or_else(|| {
                Error::reference(
                    ErrorCode::InvalidDataType,
                    format!(
                        "expected a list at '{}[{}]' while resolving '{}', got {}",
                        name,
                        index,
                        target_key,
                        kind_of(current)
                    ),
                )
            })?;
            current = list.get(index).ok_or_else(|| {
                Error::reference(
                    ErrorCode::OutOfRange,
                    format!(
                        "index {} out of bounds for '{}' while resolving '{}'",
                        index, name, target_key
                    ),
                )
            })?;
        }
    }
    Ok(current)
}

/// Split `name[1][2]` into `("name", [1, 2])`.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let (name, mut rest) = match segment.find('[') {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => (segment, ""),
    };
    if name.contains(']') || (name.is_empty() && rest.is_empty()) {
        return None;
    }

    let mut indices = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((name, indices))
}

fn not_found(target_key: &str) -> Error {
    Error::reference(
        ErrorCode::InvalidInput,
        format!(
            "parameter key '{}' not found for the given context",
            target_key
        ),
    )
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "map",
        Value::Tagged(_) => "tagged value",
    }
}

/// Key paths of every leaf string in `section` containing one of `needles`.
///
/// Paths use the same notation [`resolve_key`] accepts: `a.b`, `list[0]`,
/// `a.b[1][2].c`, and `[0]` for a top-level list. A hit whose path equals
/// `skip` is left out.
pub fn find_matching_keys(section: &Value, needles: &[String], skip: Option<&str>) -> Vec<String> {
    let mut found = Vec::new();
    let mut stack: Vec<(&Value, String)> = vec![(section, String::new())];

    while let Some((node, path)) = stack.pop() {
        match node {
            Value::Mapping(map) => {
                let entries: Vec<_> = map.iter().collect();
                for (key, child) in entries.into_iter().rev() {
                    let key = key_text(key);
                    let child_path = if path.is_empty() {
                        key
                    } else {
                        format!("{}.{}", path, key)
                    };
                    stack.push((child, child_path));
                }
            }
            Value::Sequence(items) => {
                for (idx, child) in items.iter().enumerate().rev() {
                    stack.push((child, format!("{}[{}]", path, idx)));
                }
            }
            Value::Tagged(tagged) => stack.push((&tagged.value, path)),
            Value::String(text) if needles.iter().any(|n| text.contains(n.as_str())) => {
                if skip == Some(path.as_str()) {
                    continue;
                }
                found.push(path);
            }
            _ => {}
        }
    }
    found
}
