//! Credential file encryption.
//!
//! Provides the file-level encryption contract and its implementations.
//!
//! ## Backends
//!
//! - **fernet**: per-field Fernet tokens, key from `SECRET_KEY`.
//! - **sops**: whole-file encryption via the `sops` CLI with age keys.
//! - **plain**: crypt disabled in the repository settings.
//!
//! The backend is chosen once per invocation by [`CryptBackend::from_config`]
//! and handed to the scanner, writer and payload decoder.

use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::core::config::{BackendKind, KeyMaterial, RepoConfig};
use crate::core::constants::{FERNET_MARKER, SOPS_METADATA_KEY};
use crate::core::document::Document;
use crate::error::Result;

pub mod exec;
mod fernet;
mod plain;
mod sops;

pub use fernet::FernetCrypt;
pub use plain::PlainCrypt;
pub use sops::{extract_expression, SopsCrypt};

/// File-level encryption backend.
///
/// Both directions are idempotent: decrypting plaintext or encrypting
/// ciphertext logs a warning and returns the current content. Empty
/// documents are returned untouched.
pub trait Crypt: Send + Sync {
    /// Backend name for display.
    fn name(&self) -> &'static str;

    /// Whether the file currently holds ciphertext.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    fn is_encrypted(&self, path: &Path) -> Result<bool>;

    /// Decrypt a file, returning plaintext content.
    ///
    /// With `in_place` the file on disk is replaced by its plaintext.
    ///
    /// # Errors
    ///
    /// Returns `CryptError` if key material is missing or decryption fails.
    fn decrypt(&self, path: &Path, in_place: bool) -> Result<Document>;

    /// Encrypt a plaintext file in place, returning the ciphertext content.
    ///
    /// `previous` is the file's prior ciphertext; values that did not change
    /// keep their previous ciphertext.
    ///
    /// # Errors
    ///
    /// Returns `CryptError` if key material is missing or encryption fails.
    fn encrypt(&self, path: &Path, previous: Option<&Path>) -> Result<Document>;

    /// Decrypted value of one dotted attribute.
    ///
    /// # Errors
    ///
    /// Returns `CryptError` if decryption fails.
    fn extract(&self, path: &Path, attribute: &str) -> Result<Option<Value>>;
}

/// Whether a document carries sops metadata.
pub fn has_sops_metadata(doc: &Document) -> bool {
    doc.as_mapping()
        .is_some_and(|m| m.contains_key(SOPS_METADATA_KEY))
}

/// Whether any string in a document carries the Fernet marker.
pub fn has_fernet_marker(doc: &Document) -> bool {
    let mut stack = vec![doc];
    while let Some(node) = stack.pop() {
        match node {
            Value::String(s) if s.starts_with(FERNET_MARKER) => return true,
            Value::Mapping(m) => stack.extend(m.values()),
            Value::Sequence(items) => stack.extend(items.iter()),
            _ => {}
        }
    }
    false
}

/// Backend selected from repository settings.
pub enum CryptBackend {
    Fernet(FernetCrypt),
    Sops(SopsCrypt),
    Plain(PlainCrypt),
}

impl CryptBackend {
    /// Create the backend named by the settings.
    ///
    /// # Errors
    ///
    /// Returns `CryptError::InvalidKey` if supplied key material is malformed.
    pub fn from_config(config: &RepoConfig, keys: &KeyMaterial) -> Result<Self> {
        if !config.crypt {
            debug!("crypt disabled, using plain backend");
            return Ok(Self::Plain(PlainCrypt));
        }

        match config.crypt_backend {
            BackendKind::Fernet => {
                debug!("creating fernet backend");
                let key = keys.secret_key.as_ref().map(|k| k.as_str());
                Ok(Self::Fernet(FernetCrypt::new(key, config.unencrypted()?)?))
            }
            BackendKind::Sops => {
                debug!("creating sops backend");
                Ok(Self::Sops(SopsCrypt::new(
                    keys.age_public_keys.clone(),
                    keys.age_identity(),
                    &config.unencrypted_regex,
                    config.sops_timeout(),
                )?))
            }
        }
    }

    fn inner(&self) -> &dyn Crypt {
        match self {
            Self::Fernet(c) => c,
            Self::Sops(c) => c,
            Self::Plain(c) => c,
        }
    }
}

impl std::fmt::Debug for CryptBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CryptBackend({})", self.name())
    }
}

impl Crypt for CryptBackend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool> {
        self.inner().is_encrypted(path)
    }

    fn decrypt(&self, path: &Path, in_place: bool) -> Result<Document> {
        self.inner().decrypt(path, in_place)
    }

    fn encrypt(&self, path: &Path, previous: Option<&Path>) -> Result<Document> {
        self.inner().encrypt(path, previous)
    }

    fn extract(&self, path: &Path, attribute: &str) -> Result<Option<Value>> {
        self.inner().extract(path, attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_detection() {
        let doc: Document = serde_yaml::from_str(
            "a:\n  b:\n    - x\n    - \"[encrypted:AES256_Fernet]abc\"\n",
        )
        .unwrap();
        assert!(has_fernet_marker(&doc));
        assert!(!has_sops_metadata(&doc));

        let doc: Document = serde_yaml::from_str("a: 1\nsops:\n  version: 3\n").unwrap();
        assert!(has_sops_metadata(&doc));
        assert!(!has_fernet_marker(&doc));
    }

    #[test]
    fn test_from_config_selects_backend() {
        let keys = KeyMaterial::default();

        let mut config = RepoConfig::default();
        config.crypt = false;
        assert_eq!(CryptBackend::from_config(&config, &keys).unwrap().name(), "plain");

        config.crypt = true;
        config.crypt_backend = BackendKind::Fernet;
        assert_eq!(CryptBackend::from_config(&config, &keys).unwrap().name(), "fernet");

        let bad = KeyMaterial::new(None, None, Some("short".to_string()));
        assert!(CryptBackend::from_config(&config, &bad).is_err());
    }
}
