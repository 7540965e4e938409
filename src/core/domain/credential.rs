//! Credential types.
//!
//! A credential file maps credential ids to definitions:
//!
//! ```yaml
//! db-cred:
//!   type: usernamePassword
//!   data:
//!     username: app
//!     password: s3cret
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::core::document::Document;
use crate::error::{Error, ErrorCode};

/// A credential field that can be referenced from a macro and rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Username,
    Password,
    Secret,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Username, Field::Password, Field::Secret];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Password => "password",
            Self::Secret => "secret",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "username" => Ok(Self::Username),
            "password" => Ok(Self::Password),
            "secret" => Ok(Self::Secret),
            other => Err(Error::validation(
                ErrorCode::InvalidConfig,
                format!(
                    "credential field '{}' is not supported; rotation supports username, password and secret",
                    other
                ),
            )),
        }
    }
}

/// Where a credential file lives in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Reused across environments of a cluster.
    Shared,
    /// One per environment (`Credentials/credentials.yml`).
    Environment,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str("shared"),
            Self::Environment => f.write_str("environment"),
        }
    }
}

/// A credential file with its decrypted content.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
    scope: Scope,
    encrypted: bool,
    content: Arc<Document>,
}

impl CredentialFile {
    pub fn new(path: PathBuf, scope: Scope, encrypted: bool, content: Document) -> Self {
        Self {
            path,
            scope,
            encrypted,
            content: Arc::new(content),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Whether the file was encrypted on disk when it was scanned.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Decrypted content as captured at scan time.
    pub fn content(&self) -> &Arc<Document> {
        &self.content
    }

    /// Whether the file defines the given credential id.
    pub fn contains(&self, id: &str) -> bool {
        self.content
            .as_mapping()
            .is_some_and(|m| m.contains_key(id))
    }
}

/// A queued field write against one credential file.
#[derive(Clone)]
pub struct PendingCredentialUpdate {
    pub credential_id: String,
    pub field: Field,
    pub new_value: Zeroizing<String>,
    /// Decrypted content of the owning file at scan time.
    pub snapshot: Arc<Document>,
}

impl fmt::Debug for PendingCredentialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCredentialUpdate")
            .field("credential_id", &self.credential_id)
            .field("field", &self.field)
            .field("new_value", &"<redacted>")
            .finish()
    }
}

/// Pending updates grouped by physical credential file.
pub type PendingUpdates = BTreeMap<PathBuf, Vec<PendingCredentialUpdate>>;
