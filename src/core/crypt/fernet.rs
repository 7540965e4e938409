//! Per-field Fernet backend.
//!
//! Every leaf value whose key does not match the unencrypted-key pattern is
//! sealed on its own as a Fernet token (AES-128-CBC + HMAC-SHA256):
//!
//! ```text
//! password: "[encrypted:AES256_Fernet]gAAAAAB..."
//! ```
//!
//! The key is the url-safe base64 Fernet key from `SECRET_KEY`. Sealed
//! values are the text of the scalar, so they decrypt back to strings.

use std::path::Path;

use fernet::Fernet;
use regex::Regex;
use serde_yaml::Value;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use super::{has_fernet_marker, Crypt};
use crate::core::constants::{ENV_SECRET_KEY, FERNET_MARKER};
use crate::core::document::{self, key_text, Document};
use crate::error::{CryptError, Result};

/// Symmetric per-field backend.
pub struct FernetCrypt {
    fernet: Option<Fernet>,
    unencrypted: Regex,
}

impl FernetCrypt {
    /// Build from a Fernet key. The key may be absent until a file actually
    /// needs sealing or opening.
    ///
    /// # Errors
    ///
    /// Returns `CryptError::InvalidKey` if the key is not a valid Fernet key.
    pub fn new(secret_key: Option<&str>, unencrypted: Regex) -> Result<Self> {
        let fernet = secret_key
            .map(|key| {
                Fernet::new(key.trim()).ok_or_else(|| {
                    CryptError::InvalidKey(
                        "SECRET_KEY must be 32 url-safe base64-encoded bytes".to_string(),
                    )
                })
            })
            .transpose()?;
        Ok(Self { fernet, unencrypted })
    }

    fn fernet(&self) -> Result<&Fernet> {
        self.fernet
            .as_ref()
            .ok_or_else(|| CryptError::MissingKey(ENV_SECRET_KEY).into())
    }

    fn seal(fernet: &Fernet, plaintext: &str) -> String {
        format!("{}{}", FERNET_MARKER, fernet.encrypt(plaintext.as_bytes()))
    }

    fn open(fernet: &Fernet, text: &str, path: &Path) -> Result<Zeroizing<String>> {
        let fail = |reason: &str| CryptError::DecryptionFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let token = text.replace(FERNET_MARKER, "");
        let bytes = fernet
            .decrypt(token.trim())
            .map_err(|_| fail("invalid token or wrong key"))?;
        let plaintext =
            String::from_utf8(bytes).map_err(|_| fail("decrypted value is not utf-8"))?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Whether a value under this key is left in the clear.
    fn skipped(&self, key: &Value, value: &Value) -> bool {
        matches!(value, Value::Null)
            || value.as_str() == Some("")
            || self.unencrypted.is_match(&key_text(key))
    }

    fn encrypt_document(
        &self,
        doc: &mut Document,
        previous: Option<&Document>,
        path: &Path,
    ) -> Result<usize> {
        let fernet = self.fernet()?;
        let mut sealed = 0;
        let mut reused = 0;
        let mut stack: Vec<(&mut Value, Option<&Value>)> = vec![(doc, previous)];

        while let Some((node, old)) = stack.pop() {
            let Value::Mapping(map) = node else { continue };
            let old_map = old.and_then(Value::as_mapping);

            for (key, value) in map.iter_mut() {
                let old_value = old_map.and_then(|m| m.get(key));
                if value.is_mapping() {
                    stack.push((value, old_value));
                    continue;
                }
                if self.skipped(key, value) {
                    continue;
                }

                let plaintext = Zeroizing::new(scalar_text(value)?);
                if let Some(old_text) = old_value.and_then(Value::as_str) {
                    let unchanged = old_text.contains(FERNET_MARKER)
                        && Self::open(fernet, old_text, path)
                            .is_ok_and(|old_plain| *old_plain == *plaintext);
                    if unchanged {
                        *value = Value::String(old_text.to_string());
                        reused += 1;
                        continue;
                    }
                }

                *value = Value::String(Self::seal(fernet, &plaintext));
                sealed += 1;
            }
        }

        trace!(sealed, reused, "sealed fields");
        Ok(sealed + reused)
    }

    fn decrypt_document(&self, doc: &mut Document, path: &Path) -> Result<()> {
        let fernet = self.fernet()?;
        let mut stack: Vec<&mut Value> = vec![doc];

        while let Some(node) = stack.pop() {
            let Value::Mapping(map) = node else { continue };
            for (_, value) in map.iter_mut() {
                if value.is_mapping() {
                    stack.push(value);
                    continue;
                }
                let opened = match value.as_str() {
                    Some(text) if text.contains(FERNET_MARKER) => Self::open(fernet, text, path)?,
                    _ => continue,
                };
                *value = Value::String(opened.to_string());
            }
        }
        Ok(())
    }
}

/// Text sealed for a leaf value: strings as-is, other scalars by their
/// literal, lists as JSON.
fn scalar_text(value: &Value) -> Result<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other)?,
    })
}

impl Crypt for FernetCrypt {
    fn name(&self) -> &'static str {
        "fernet"
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool> {
        Ok(has_fernet_marker(&document::read(path)?))
    }

    fn decrypt(&self, path: &Path, in_place: bool) -> Result<Document> {
        let mut doc = document::read(path)?;
        if document::is_empty(&doc) {
            debug!(path = %path.display(), "file is empty, skipping decryption");
            return Ok(doc);
        }
        if !has_fernet_marker(&doc) {
            warn!(path = %path.display(), "file is not encrypted");
            return Ok(doc);
        }

        self.decrypt_document(&mut doc, path)?;
        if in_place {
            document::write(path, &doc)?;
            info!(path = %path.display(), "file decrypted");
        }
        Ok(doc)
    }

    fn encrypt(&self, path: &Path, previous: Option<&Path>) -> Result<Document> {
        let mut doc = document::read(path)?;
        if document::is_empty(&doc) {
            debug!(path = %path.display(), "file is empty, skipping encryption");
            return Ok(doc);
        }
        if has_fernet_marker(&doc) {
            warn!(path = %path.display(), "file is already encrypted");
            return Ok(doc);
        }

        let old = match previous {
            Some(p) if p.is_file() => Some(document::read(p)?),
            _ => None,
        };
        let fields = self.encrypt_document(&mut doc, old.as_ref(), path)?;
        document::write(path, &doc)?;
        info!(path = %path.display(), fields, "file encrypted");
        Ok(doc)
    }

    fn extract(&self, path: &Path, attribute: &str) -> Result<Option<Value>> {
        let doc = self.decrypt(path, false)?;
        Ok(document::lookup(&doc, attribute).cloned())
    }
}
