//! Backend used when crypt is disabled.

use std::path::Path;

use serde_yaml::Value;

use super::{has_fernet_marker, has_sops_metadata, Crypt};
use crate::core::document::{self, Document};
use crate::error::{CryptError, Result};

/// Reads and writes plaintext; refuses files that carry ciphertext.
pub struct PlainCrypt;

impl PlainCrypt {
    fn read_plain(path: &Path) -> Result<Document> {
        let doc = document::read(path)?;
        if has_sops_metadata(&doc) || has_fernet_marker(&doc) {
            return Err(CryptError::UnexpectedCiphertext(path.to_path_buf()).into());
        }
        Ok(doc)
    }
}

impl Crypt for PlainCrypt {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool> {
        let doc = document::read(path)?;
        Ok(has_sops_metadata(&doc) || has_fernet_marker(&doc))
    }

    fn decrypt(&self, path: &Path, _in_place: bool) -> Result<Document> {
        Self::read_plain(path)
    }

    fn encrypt(&self, path: &Path, _previous: Option<&Path>) -> Result<Document> {
        Self::read_plain(path)
    }

    fn extract(&self, path: &Path, attribute: &str) -> Result<Option<Value>> {
        let doc = Self::read_plain(path)?;
        Ok(document::lookup(&doc, attribute).cloned())
    }
}
