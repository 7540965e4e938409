//! Test support utilities for credrot integration tests.
//!
//! Builds configuration repository trees in temp directories.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use credrot::core::config::{KeyMaterial, Workspace};
use credrot::core::rotate::RotationSettings;
use serde_json::json;
use tempfile::TempDir;

pub const CLUSTER: &str = "cluster-1";
pub const ENV: &str = "env-1";

/// A valid age public key.
pub const RECIPIENT: &str = "age1ql3z7hjy54pw3hyww5ayyfg7zqgvc7w3j2elw8zmrj2kg5sfn9aqmcac8p";

/// A valid Fernet key (32 bytes of `*`).
pub const FERNET_KEY: &str = "KioqKioqKioqKioqKioqKioqKioqKioqKioqKioqKio=";

pub const SHARED_CREDS: &str = "environments/credentials/shared-db.yml";
pub const ENV1_CREDS: &str = "environments/cluster-1/env-1/Credentials/credentials.yml";
pub const ENV2_CREDS: &str = "environments/cluster-1/env-2/Credentials/credentials.yml";
pub const AUDIT: &str = "affected-sensitive-parameters.yaml";
pub const MANIFEST: &str = "environments/rotated_credential_files.yml";

const DB_CRED: &str = r#"db-cred:
  type: usernamePassword
  data:
    username: app
    password: old-password
"#;

/// Skip a test if the sops binary is not installed.
#[macro_export]
macro_rules! skip_without_sops {
    () => {
        if which::which("sops").is_err() {
            eprintln!("SKIPPED: sops not found on PATH");
            return;
        }
    };
}

/// A repository tree in a temp directory.
pub struct Repo {
    pub dir: TempDir,
}

impl Repo {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Two environments sharing `db-cred`:
    ///
    /// - shared file `shared-db` and both environment credential files
    ///   define it
    /// - `ns1` in env-1 targets it from `deployParameters.DB_PASSWORD`
    /// - the env-1 `billing` application and env-2 `ns1` reference it too
    /// - `lonely` is referenced exactly once
    pub fn standard() -> Self {
        let repo = Self::new();
        repo.put("configuration/config.yml", "crypt: false\n");
        repo.put(
            "environments/cluster-1/env-1/Inventory/env_definition.yml",
            "name: env-1\nenvTemplate:\n  sharedMasterCredentialFiles:\n    - shared-db\n",
        );
        repo.put(
            "environments/cluster-1/env-2/Inventory/env_definition.yml",
            "name: env-2\nenvTemplate:\n  sharedMasterCredentialFiles:\n    - shared-db\n",
        );
        repo.put(SHARED_CREDS, DB_CRED);
        repo.put(
            ENV1_CREDS,
            &format!(
                "{}lonely:\n  type: secret\n  data:\n    secret: old-secret\n",
                DB_CRED
            ),
        );
        repo.put(ENV2_CREDS, DB_CRED);
        repo.put(
            "environments/cluster-1/env-1/Namespaces/ns1/namespace.yml",
            r#"name: ns1
deployParameters:
  DB_PASSWORD: ${creds.get("db-cred").password}
  DB_USER: ${creds.get("db-cred").username}
  TOKEN: ${creds.get("lonely").secret}
"#,
        );
        repo.put(
            "environments/cluster-1/env-1/Namespaces/ns1/Applications/billing.yml",
            r#"name: billing
technicalConfigurationParameters:
  datasource:
    url: "postgres://app:${creds.get('db-cred').password}@db:5432/billing"
e2eParameters:
  E2E_DB_PASSWORD: ${creds.get("db-cred").password}
"#,
        );
        repo.put(
            "environments/cluster-1/env-2/Namespaces/ns1/namespace.yml",
            r#"name: ns1
e2eParameters:
  DB_PASS: ${creds.get("db-cred").password}
"#,
        );
        repo
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn put(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("relative path has a parent"))
            .expect("failed to create parent dirs");
        fs::write(&path, body).expect("failed to write fixture");
        path
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("failed to read fixture")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.root(), CLUSTER, ENV).expect("valid workspace")
    }

    pub fn settings(&self, payload: String, force: bool) -> RotationSettings {
        RotationSettings {
            workspace: self.workspace(),
            keys: KeyMaterial::default(),
            payload,
            force,
        }
    }

    /// A credrot command scoped to this repository, with key variables cleared.
    pub fn cmd(&self) -> Command {
        #[allow(deprecated)]
        let mut cmd = Command::cargo_bin("credrot").expect("failed to find credrot binary");
        cmd.env("CI_PROJECT_DIR", self.root())
            .env("CLUSTER_NAME", CLUSTER)
            .env("ENV_NAME", ENV)
            .env("NO_COLOR", "1")
            .env_remove("CRED_ROTATION_PAYLOAD")
            .env_remove("CRED_ROTATION_FORCE")
            .env_remove("ENVGENE_AGE_PUBLIC_KEY")
            .env_remove("PUBLIC_AGE_KEYS")
            .env_remove("ENVGENE_AGE_PRIVATE_KEY")
            .env_remove("SECRET_KEY")
            .env_remove("CREDROT_LOG");
        cmd
    }
}

/// A payload with one namespace-level request.
pub fn namespace_request(namespace: &str, context: &str, key: &str, value: &str) -> String {
    json!({
        "rotation_items": [{
            "namespace": namespace,
            "context": context,
            "parameter_key": key,
            "parameter_value": value
        }]
    })
    .to_string()
}

/// Value of a dotted attribute in a YAML string.
pub fn yaml_value(text: &str, attribute: &str) -> Option<String> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text).ok()?;
    let mut current = &doc;
    for part in attribute.split('.') {
        current = current.get(part)?;
    }
    current.as_str().map(String::from)
}
