//! Settings.
//!
//! Repository-level settings come from `configuration/config.yml` under the
//! workspace root; scope and key material come from environment variables
//! (bound by the CLI).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::core::constants;
use crate::error::{ConfigError, Result};

/// Which encryption backend credential files use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BackendKind {
    /// Per-field Fernet tokens.
    #[serde(rename = "Fernet", alias = "fernet", alias = "FERNET")]
    Fernet,
    /// Whole-file sops with age keys.
    #[serde(rename = "SOPS", alias = "sops", alias = "Sops")]
    Sops,
}

/// Contents of `configuration/config.yml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Whether credential files are encrypted at all.
    pub crypt: bool,
    pub crypt_backend: BackendKind,
    /// Keys whose values are never encrypted.
    pub unencrypted_regex: String,
    pub sops_timeout_secs: u64,
    /// Credential file count above which decrypts run on the worker pool.
    pub parallel_decrypt_threshold: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            crypt: true,
            crypt_backend: BackendKind::Fernet,
            unencrypted_regex: constants::DEFAULT_UNENCRYPTED_REGEX.to_string(),
            sops_timeout_secs: constants::DEFAULT_SOPS_TIMEOUT_SECS,
            parallel_decrypt_threshold: constants::DEFAULT_PARALLEL_DECRYPT_THRESHOLD,
        }
    }
}

impl RepoConfig {
    /// Load settings from the workspace, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed or validated.
    pub fn load(root: &Path) -> Result<Self> {
        let Some(path) = constants::CONFIG_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.is_file())
        else {
            debug!(root = %root.display(), "no repository config, using defaults");
            return Ok(Self::default());
        };

        debug!(path = %path.display(), "loading repository config");
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        };
        config.validate()?;

        debug!(
            crypt = config.crypt,
            backend = ?config.crypt_backend,
            "repository config loaded"
        );
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unusable regex or zero timeout.
    pub fn validate(&self) -> Result<()> {
        self.unencrypted()?;
        if self.sops_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sops_timeout_secs",
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Compiled unencrypted-key regex.
    pub fn unencrypted(&self) -> Result<Regex> {
        Regex::new(&self.unencrypted_regex).map_err(|e| {
            ConfigError::InvalidValue {
                field: "unencrypted_regex",
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn sops_timeout(&self) -> Duration {
        Duration::from_secs(self.sops_timeout_secs)
    }
}

/// Cluster/environment scope of one invocation.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    cluster: String,
    environment: String,
}

impl Workspace {
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming every empty setting.
    pub fn new(root: impl Into<PathBuf>, cluster: &str, environment: &str) -> Result<Self> {
        let mut missing = Vec::new();
        if cluster.trim().is_empty() {
            missing.push(constants::ENV_CLUSTER_NAME);
        }
        if environment.trim().is_empty() {
            missing.push(constants::ENV_ENV_NAME);
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing.join(", ")).into());
        }

        Ok(Self {
            root: root.into(),
            cluster: cluster.trim().to_string(),
            environment: environment.trim().to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// `<root>/environments`
    pub fn environments_dir(&self) -> PathBuf {
        self.root.join(constants::ENVIRONMENTS_DIR)
    }

    /// `<root>/environments/<cluster>`
    pub fn cluster_dir(&self) -> PathBuf {
        self.environments_dir().join(&self.cluster)
    }

    /// `<root>/environments/<cluster>/<env>`
    pub fn env_dir(&self) -> PathBuf {
        self.cluster_dir().join(&self.environment)
    }

    /// Locations searched for shared credential files, besides the cluster
    /// subtree itself.
    pub fn shared_credential_roots(&self) -> Vec<PathBuf> {
        vec![
            self.environments_dir().join(constants::SHARED_CREDENTIALS_DIR),
            self.cluster_dir().join(constants::SHARED_CREDENTIALS_DIR),
            self.root
                .join(constants::CONFIGURATION_DIR)
                .join(constants::SHARED_CREDENTIALS_DIR),
        ]
    }

    pub fn audit_path(&self) -> PathBuf {
        self.root.join(constants::AUDIT_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.environments_dir().join(constants::MANIFEST_FILE)
    }
}

/// Externally supplied key material.
#[derive(Default, Clone)]
pub struct KeyMaterial {
    /// age recipients for sops encryption.
    pub age_public_keys: Vec<String>,
    /// age identity (`AGE-SECRET-KEY-1...`) for sops decryption.
    pub age_private_key: Option<Zeroizing<String>>,
    /// Fernet key for the symmetric backend.
    pub secret_key: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("age_public_keys", &self.age_public_keys)
            .field("age_private_key", &self.age_private_key.as_ref().map(|_| "<set>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl KeyMaterial {
    /// Build from raw values; public keys may be comma or newline separated.
    pub fn new(
        public_keys: Option<&str>,
        private_key: Option<String>,
        secret_key: Option<String>,
    ) -> Self {
        let age_public_keys = public_keys
            .unwrap_or_default()
            .split([',', '\n'])
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();

        let non_empty = |v: Option<String>| {
            v.filter(|s| !s.trim().is_empty())
                .map(|s| Zeroizing::new(s.trim().to_string()))
        };

        Self {
            age_public_keys,
            age_private_key: non_empty(private_key),
            secret_key: non_empty(secret_key),
        }
    }

    /// The age identity, falling back to the sops default key file.
    pub fn age_identity(&self) -> Option<Zeroizing<String>> {
        if let Some(key) = &self.age_private_key {
            return Some(key.clone());
        }
        let path = dirs::config_dir()?.join(constants::SOPS_AGE_KEY_FILE);
        read_identity_file(&path)
    }
}

/// First `AGE-SECRET-KEY-` line of an age key file.
fn read_identity_file(path: &Path) -> Option<Zeroizing<String>> {
    let contents = Zeroizing::new(fs::read_to_string(path).ok()?);
    let key = contents
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("AGE-SECRET-KEY-"))?;
    debug!(path = %path.display(), "using age identity from key file");
    Some(Zeroizing::new(key.to_string()))
}

/// Interpret a force flag value: only `true` (any case) enables mutation.
pub fn parse_force(value: &str) -> bool {
    let enabled = value.trim().eq_ignore_ascii_case("true");
    if !enabled && !value.trim().is_empty() && !value.trim().eq_ignore_ascii_case("false") {
        warn!(value = %value, "unrecognised force flag value, treating as false");
    }
    enabled
}
