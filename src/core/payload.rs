//! Rotation payload decoding.
//!
//! The payload arrives through an environment variable, so CI tooling may
//! have wrapped it as a YAML block scalar, split it across lines or base64
//! encoded it. It may also be encrypted with the repository's crypt backend.

use std::io::Write;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::crypt::{has_fernet_marker, has_sops_metadata, Crypt};
use crate::core::document::{self, Format};
use crate::core::domain::RotationRequest;
use crate::error::{Error, ErrorCode, Result};

/// Key holding the list of requests.
pub const ITEMS_KEY: &str = "rotation_items";

fn line_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n\s*").expect("static line break pattern"))
}

/// Strip transport artifacts: BOM, surrounding whitespace, a leading block
/// scalar indicator and embedded line breaks with their indentation.
pub fn clean(raw: &str) -> String {
    let mut text = raw.trim_start_matches('\u{feff}').trim();
    if text.starts_with('|') {
        text = text.trim_start_matches(['|', '\n', ' ']).trim();
    }
    if text.contains('\n') {
        line_break().replace_all(text, "").into_owned()
    } else {
        text.to_string()
    }
}

/// Parse a cleaned payload: base64-encoded JSON first, then plain JSON.
///
/// # Errors
///
/// Returns `Validation` if neither form parses to a JSON object.
pub fn decode(raw: &str) -> Result<Value> {
    let text = clean(raw);

    let from_base64 = STANDARD
        .decode(text.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|decoded| serde_json::from_str::<Value>(&decoded).ok());

    let value = match from_base64 {
        Some(value) => {
            debug!("payload decoded from base64");
            value
        }
        None => serde_json::from_str(&text).map_err(|e| {
            Error::validation(
                ErrorCode::InvalidConfig,
                format!(
                    "failed to parse JSON content in CRED_ROTATION_PAYLOAD: {}",
                    e
                ),
            )
        })?,
    };

    if !value.is_object() {
        return Err(Error::validation(
            ErrorCode::InvalidConfig,
            "CRED_ROTATION_PAYLOAD must be a JSON object with a rotation_items list",
        ));
    }
    Ok(value)
}

/// Decrypt the payload through the backend when it carries ciphertext.
///
/// # Errors
///
/// Returns `Validation` if the payload is encrypted and cannot be decrypted.
pub fn decrypt(value: Value, crypt: &dyn Crypt) -> Result<Value> {
    let doc: document::Document = serde_yaml::to_value(&value)?;
    if !has_sops_metadata(&doc) && !has_fernet_marker(&doc) {
        return Ok(value);
    }

    info!(backend = crypt.name(), "payload is encrypted, decrypting");
    let wrap = |e: Error| {
        Error::validation(
            ErrorCode::InvalidConfig,
            format!(
                "failed to decrypt content of CRED_ROTATION_PAYLOAD: {}; check that it was encrypted with the repository keys",
                e
            ),
        )
    };

    let mut file = tempfile::Builder::new()
        .prefix(".credrot-payload-")
        .suffix(Format::Yaml.suffix())
        .tempfile()
        .map_err(|e| wrap(e.into()))?;
    let text = document::render(&doc, Format::Yaml)?;
    file.write_all(text.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| wrap(e.into()))?;

    let plain = crypt.decrypt(file.path(), false).map_err(wrap)?;
    let mut value = serde_json::to_value(&plain)?;

    // per-field backends seal the whole list as its JSON text
    if let Some(Value::String(text)) = value.get(ITEMS_KEY) {
        let items = serde_json::from_str::<Value>(text).map_err(|e| wrap(e.into()))?;
        value[ITEMS_KEY] = items;
    }
    Ok(value)
}

/// Requests listed in a decoded payload. A missing list is an empty batch.
///
/// # Errors
///
/// Returns `Validation` if the list or any entry is malformed.
pub fn rotation_items(value: &Value) -> Result<Vec<RotationRequest>> {
    let items = match value.get(ITEMS_KEY) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(Error::validation(
                ErrorCode::InvalidConfig,
                format!("'{}' in CRED_ROTATION_PAYLOAD must be a list", ITEMS_KEY),
            ))
        }
    };
    items.iter().map(RotationRequest::from_value).collect()
}

/// Decode, decrypt and parse a raw payload.
///
/// # Errors
///
/// See [`decode`], [`decrypt`] and [`rotation_items`].
pub fn load(raw: &str, crypt: &dyn Crypt) -> Result<Vec<RotationRequest>> {
    let value = decrypt(decode(raw)?, crypt)?;
    let requests = rotation_items(&value)?;
    info!(requests = requests.len(), "payload loaded");
    Ok(requests)
}
