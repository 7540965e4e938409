//! Constants used throughout credrot.
//!
//! Centralizes repository layout names, file names and defaults.

/// Directory holding every cluster under the workspace root.
pub const ENVIRONMENTS_DIR: &str = "environments";

/// Repository configuration directory.
pub const CONFIGURATION_DIR: &str = "configuration";

/// Candidate settings files, relative to the workspace root.
pub const CONFIG_FILES: &[&str] = &["configuration/config.yml", "configuration/config.yaml"];

/// Subtree holding namespace and application documents.
pub const NAMESPACES_DIR: &str = "Namespaces";

/// Directory of an environment's definition file.
pub const INVENTORY_DIR: &str = "Inventory";

/// Environment definition file stem.
pub const ENV_DEFINITION_STEM: &str = "env_definition";

/// Directory of an environment's credential file.
pub const CREDENTIALS_DIR: &str = "Credentials";

/// Environment credential file stem.
pub const CREDENTIALS_STEM: &str = "credentials";

/// Directory name searched for shared credential files.
pub const SHARED_CREDENTIALS_DIR: &str = "credentials";

/// Namespace document file names.
pub const NAMESPACE_FILES: &[&str] = &["namespace.yml", "namespace.yaml"];

/// Audit artifact, relative to the workspace root.
pub const AUDIT_FILE: &str = "affected-sensitive-parameters.yaml";

/// Manifest of rewritten credential files, relative to `environments/`.
pub const MANIFEST_FILE: &str = "rotated_credential_files.yml";

/// Marker prefix of Fernet-encrypted values.
pub const FERNET_MARKER: &str = "[encrypted:AES256_Fernet]";

/// Top-level key sops adds to encrypted documents.
pub const SOPS_METADATA_KEY: &str = "sops";

/// Keys never encrypted by default.
pub const DEFAULT_UNENCRYPTED_REGEX: &str = "^(type|name|description)$";

/// Hard timeout for a single sops invocation.
pub const DEFAULT_SOPS_TIMEOUT_SECS: u64 = 5;

/// Credential file count above which decrypts use the worker pool.
pub const DEFAULT_PARALLEL_DECRYPT_THRESHOLD: usize = 8;

/// sops exit code for "file has not been modified" after `edit`.
pub const SOPS_EXIT_NOT_MODIFIED: i32 = 200;

/// Default age key file under the user config directory.
pub const SOPS_AGE_KEY_FILE: &str = "sops/age/keys.txt";

/// Environment variable names.
pub const ENV_ENV_NAME: &str = "ENV_NAME";
pub const ENV_CLUSTER_NAME: &str = "CLUSTER_NAME";
pub const ENV_WORKSPACE: &str = "CI_PROJECT_DIR";
pub const ENV_PAYLOAD: &str = "CRED_ROTATION_PAYLOAD";
pub const ENV_FORCE: &str = "CRED_ROTATION_FORCE";
pub const ENV_AGE_PUBLIC_KEY: &str = "ENVGENE_AGE_PUBLIC_KEY";
pub const ENV_AGE_PUBLIC_KEYS: &str = "PUBLIC_AGE_KEYS";
pub const ENV_AGE_PRIVATE_KEY: &str = "ENVGENE_AGE_PRIVATE_KEY";
pub const ENV_SECRET_KEY: &str = "SECRET_KEY";

/// Log filter variable.
pub const ENV_LOG: &str = "CREDROT_LOG";
