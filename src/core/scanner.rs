//! Repository scanning.
//!
//! One walk of `environments/<cluster>` classifies every file; a second pass
//! resolves the shared credential files that environment definitions name.
//! Credential files are decrypted through the active backend, entity files
//! are read concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::config::Workspace;
use crate::core::constants::{
    CREDENTIALS_DIR, CREDENTIALS_STEM, ENV_DEFINITION_STEM, INVENTORY_DIR, NAMESPACES_DIR,
};
use crate::core::crypt::Crypt;
use crate::core::document::{self, Document, Format};
use crate::core::domain::{CredentialFile, Scope};
use crate::core::pool;
use crate::error::{Error, ErrorCode, Result};

/// Files found by the walk, before any content is read.
#[derive(Debug, Default)]
struct Classified {
    entities: Vec<PathBuf>,
    env_definitions: Vec<PathBuf>,
    env_credentials: Vec<PathBuf>,
    /// Every `.yml`, `.yaml` and `.json` file in the cluster.
    candidates: Vec<PathBuf>,
}

/// Everything a rotation run reads from the repository.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Namespace and application documents, keyed by path.
    pub entities: BTreeMap<PathBuf, Document>,
    pub env_definitions: BTreeMap<PathBuf, Document>,
    pub shared_credentials: BTreeMap<PathBuf, CredentialFile>,
    pub environment_credentials: BTreeMap<PathBuf, CredentialFile>,
    /// Shared credential file names declared by environment definitions.
    pub shared_names: BTreeSet<String>,
    /// Declared names with no matching file.
    pub unresolved: Vec<String>,
}

impl ScanResult {
    /// Shared and environment credential files defining `id`, in that order.
    pub fn owners(&self, id: &str) -> (Vec<&CredentialFile>, Vec<&CredentialFile>) {
        let shared = self
            .shared_credentials
            .values()
            .filter(|f| f.contains(id))
            .collect();
        let environment = self
            .environment_credentials
            .values()
            .filter(|f| f.contains(id))
            .collect();
        (shared, environment)
    }
}

/// Scans one cluster of a workspace.
pub struct Scanner<'a> {
    workspace: &'a Workspace,
    crypt: &'a dyn Crypt,
    parallel_threshold: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(workspace: &'a Workspace, crypt: &'a dyn Crypt, parallel_threshold: usize) -> Self {
        Self {
            workspace,
            crypt,
            parallel_threshold,
        }
    }

    /// Walk, classify and load the cluster.
    ///
    /// # Errors
    ///
    /// - `Reference` if the cluster directory does not exist.
    /// - `Validation` if a file fails to parse or decrypt.
    pub fn scan(&self) -> Result<ScanResult> {
        let cluster_dir = self.workspace.cluster_dir();
        if !cluster_dir.is_dir() {
            return Err(Error::reference(
                ErrorCode::InvalidPath,
                format!(
                    "cluster directory {} does not exist; expected <root>/environments/<cluster>/<env>",
                    cluster_dir.display()
                ),
            ));
        }

        let classified = classify(&cluster_dir)?;
        debug!(
            entities = classified.entities.len(),
            env_definitions = classified.env_definitions.len(),
            env_credentials = classified.env_credentials.len(),
            "classified cluster files"
        );

        let mut env_definitions = BTreeMap::new();
        for path in &classified.env_definitions {
            env_definitions.insert(path.clone(), read_validated(path)?);
        }

        let shared_names = shared_credential_names(env_definitions.values());
        if !shared_names.is_empty() {
            info!(names = ?shared_names, "shared credential files declared");
        }

        let env_credential_set: BTreeSet<&PathBuf> = classified.env_credentials.iter().collect();
        let mut shared_paths = BTreeSet::new();
        let mut unresolved = Vec::new();
        let root_files: Vec<PathBuf> = self
            .workspace
            .shared_credential_roots()
            .iter()
            .filter(|root| root.is_dir())
            .map(|root| walk(root))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        for name in &shared_names {
            let matches: Vec<&PathBuf> = root_files
                .iter()
                .chain(classified.candidates.iter())
                .filter(|p| is_credential_candidate(p, name))
                .filter(|p| !env_credential_set.contains(p))
                .collect();

            if matches.is_empty() {
                warn!(name = %name, "shared credential file not found");
                unresolved.push(name.clone());
                continue;
            }
            if matches.len() > 1 {
                debug!(name = %name, count = matches.len(), "shared credential name matched several files");
            }
            shared_paths.extend(matches.into_iter().cloned());
        }

        let mut jobs: Vec<(PathBuf, Scope)> = shared_paths
            .into_iter()
            .map(|p| (p, Scope::Shared))
            .collect();
        jobs.extend(
            classified
                .env_credentials
                .iter()
                .map(|p| (p.clone(), Scope::Environment)),
        );

        let mut shared_credentials = BTreeMap::new();
        let mut environment_credentials = BTreeMap::new();
        for file in self.load_credentials(jobs)? {
            let target = match file.scope() {
                Scope::Shared => &mut shared_credentials,
                Scope::Environment => &mut environment_credentials,
            };
            target.insert(file.path().to_path_buf(), file);
        }

        let entities = load_entities(classified.entities)?;

        info!(
            entities = entities.len(),
            shared = shared_credentials.len(),
            environment = environment_credentials.len(),
            "scan complete"
        );

        Ok(ScanResult {
            entities,
            env_definitions,
            shared_credentials,
            environment_credentials,
            shared_names,
            unresolved,
        })
    }

    /// Decrypt credential files, on the pool above the threshold.
    fn load_credentials(&self, jobs: Vec<(PathBuf, Scope)>) -> Result<Vec<CredentialFile>> {
        let crypt = self.crypt;
        let load = |(path, scope): (PathBuf, Scope)| -> Result<CredentialFile> {
            let wrap = |e: Error| {
                Error::validation(
                    ErrorCode::InvalidConfig,
                    format!("failed to read credential file {}: {}", path.display(), e),
                )
            };
            let encrypted = crypt.is_encrypted(&path).map_err(wrap)?;
            let content = crypt.decrypt(&path, false).map_err(wrap)?;
            if !matches!(content, Value::Mapping(_)) {
                return Err(Error::validation(
                    ErrorCode::InvalidConfig,
                    format!(
                        "credential file {} must map credential ids to definitions",
                        path.display()
                    ),
                ));
            }
            Ok(CredentialFile::new(path, scope, encrypted, content))
        };

        let results = if jobs.len() > self.parallel_threshold {
            let workers = pool::worker_count(jobs.len());
            debug!(files = jobs.len(), workers, "decrypting credential files on pool");
            pool::run(jobs, workers, load)
        } else {
            debug!(files = jobs.len(), "decrypting credential files sequentially");
            jobs.into_iter().map(load).collect()
        };
        results.into_iter().collect()
    }
}

/// Walk the cluster once and classify what is found.
fn classify(cluster_dir: &Path) -> Result<Classified> {
    let mut classified = Classified::default();

    for path in walk(cluster_dir)? {
        let yaml = document::is_yaml(&path);
        if yaml || Format::from_path(&path) == Format::Json {
            classified.candidates.push(path.clone());
        }
        if !yaml {
            continue;
        }

        let relative = path.strip_prefix(cluster_dir).unwrap_or(&path);
        let parent = path.parent().and_then(Path::file_name).and_then(OsStr::to_str);
        let stem = path.file_stem().and_then(OsStr::to_str);

        if relative
            .components()
            .any(|c| c.as_os_str() == NAMESPACES_DIR)
        {
            classified.entities.push(path);
        } else if parent == Some(INVENTORY_DIR) && stem == Some(ENV_DEFINITION_STEM) {
            classified.env_definitions.push(path);
        } else if parent == Some(CREDENTIALS_DIR) && stem == Some(CREDENTIALS_STEM) {
            classified.env_credentials.push(path);
        }
    }
    Ok(classified)
}

/// Every regular file below `dir`, sorted, without following symlinks.
fn walk(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let mut entries = fs::read_dir(&current)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries.into_iter().rev() {
            let kind = entry.file_type()?;
            if kind.is_dir() {
                stack.push(entry.path());
            } else if kind.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_credential_candidate(path: &Path, name: &str) -> bool {
    let ext_ok = matches!(
        path.extension().and_then(OsStr::to_str),
        Some("yml" | "yaml" | "json")
    );
    ext_ok && path.file_stem().and_then(OsStr::to_str) == Some(name)
}

/// Union of `envTemplate.sharedMasterCredentialFiles` across definitions.
fn shared_credential_names<'d>(definitions: impl Iterator<Item = &'d Document>) -> BTreeSet<String> {
    definitions
        .filter_map(|def| document::lookup(def, "envTemplate.sharedMasterCredentialFiles"))
        .filter_map(Value::as_sequence)
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn read_validated(path: &Path) -> Result<Document> {
    document::read(path).map_err(|e| {
        Error::validation(
            ErrorCode::InvalidConfig,
            format!("failed to parse YAML file {}: {}", path.display(), e),
        )
    })
}

/// Read and parse entity files concurrently on a current-thread runtime.
/// Empty documents are dropped.
fn load_entities(paths: Vec<PathBuf>) -> Result<BTreeMap<PathBuf, Document>> {
    if paths.is_empty() {
        return Ok(BTreeMap::new());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut tasks = JoinSet::new();
        for path in paths {
            tasks.spawn(async move {
                let text = tokio::fs::read_to_string(&path).await;
                (path, text)
            });
        }

        let mut entities = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (path, text) = joined
                .map_err(|e| Error::runtime(ErrorCode::Runtime, format!("entity read task failed: {}", e)))?;
            let doc = text
                .map_err(Error::from)
                .and_then(|t| document::parse(&t, Format::Yaml))
                .map_err(|e| {
                    Error::validation(
                        ErrorCode::InvalidConfig,
                        format!("failed to parse YAML file {}: {}", path.display(), e),
                    )
                })?;
            if !document::is_empty(&doc) {
                entities.insert(path, doc);
            }
        }
        Ok::<_, Error>(entities)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypt::PlainCrypt;
    use tempfile::TempDir;

    fn put(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        put(
            root,
            "environments/c1/env-1/Inventory/env_definition.yml",
            "envTemplate:\n  sharedMasterCredentialFiles:\n    - shared-creds\n    - missing-creds\n",
        );
        put(
            root,
            "environments/c1/env-2/Inventory/env_definition.yaml",
            "envTemplate:\n  sharedMasterCredentialFiles: [other-creds]\n",
        );
        put(
            root,
            "environments/c1/env-1/Credentials/credentials.yml",
            "db-cred:\n  type: usernamePassword\n  data:\n    username: u\n    password: p\n",
        );
        put(
            root,
            "environments/credentials/shared-creds.yml",
            "db-cred:\n  type: usernamePassword\n  data:\n    username: u\n    password: p\n",
        );
        put(
            root,
            "environments/c1/credentials/other-creds.json",
            "{\"api\": {\"type\": \"secret\", \"data\": {\"secret\": \"s\"}}}",
        );
        put(
            root,
            "environments/c1/env-1/Namespaces/ns1/namespace.yml",
            "name: ns1\ndeployParameters:\n  DB_PASSWORD: ${creds.get(\"db-cred\").password}\n",
        );
        put(
            root,
            "environments/c1/env-1/Namespaces/ns1/Applications/app.yml",
            "name: app\n",
        );
        put(root, "environments/c1/env-1/Namespaces/ns1/empty.yml", "");
        put(root, "environments/c1/env-1/Namespaces/ns1/notes.txt", "ignored");
        dir
    }

    #[test]
    fn test_scan_classifies_and_resolves() {
        let dir = tree();
        let ws = Workspace::new(dir.path(), "c1", "env-1").unwrap();
        let scan = Scanner::new(&ws, &PlainCrypt, 8).scan().unwrap();

        assert_eq!(scan.entities.len(), 2);
        assert_eq!(scan.env_definitions.len(), 2);
        assert_eq!(scan.environment_credentials.len(), 1);
        assert_eq!(scan.shared_credentials.len(), 2);
        assert_eq!(
            scan.shared_names.iter().cloned().collect::<Vec<_>>(),
            vec!["missing-creds", "other-creds", "shared-creds"]
        );
        assert_eq!(scan.unresolved, vec!["missing-creds"]);

        let (shared, env) = scan.owners("db-cred");
        assert_eq!(shared.len(), 1);
        assert_eq!(env.len(), 1);
        assert!(shared[0].path().ends_with("environments/credentials/shared-creds.yml"));
    }

    #[test]
    fn test_pool_path_matches_sequential() {
        let dir = tree();
        let ws = Workspace::new(dir.path(), "c1", "env-1").unwrap();
        let sequential = Scanner::new(&ws, &PlainCrypt, 100).scan().unwrap();
        let pooled = Scanner::new(&ws, &PlainCrypt, 0).scan().unwrap();

        assert_eq!(
            sequential.shared_credentials.keys().collect::<Vec<_>>(),
            pooled.shared_credentials.keys().collect::<Vec<_>>()
        );
        assert_eq!(sequential.entities, pooled.entities);
    }

    #[test]
    fn test_invalid_entity_yaml_names_file() {
        let dir = tree();
        put(
            dir.path(),
            "environments/c1/env-1/Namespaces/ns2/namespace.yml",
            "name: [unclosed\n",
        );
        let ws = Workspace::new(dir.path(), "c1", "env-1").unwrap();
        let err = Scanner::new(&ws, &PlainCrypt, 8).scan().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("ns2/namespace.yml"));
    }

    #[test]
    fn test_missing_cluster() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), "nope", "env-1").unwrap();
        let err = Scanner::new(&ws, &PlainCrypt, 8).scan().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPath);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_skips_symlinks() {
        let dir = tree();
        let outside = TempDir::new().unwrap();
        put(outside.path(), "Namespaces/x/namespace.yml", "name: x\n");
        std::os::unix::fs::symlink(
            outside.path(),
            dir.path().join("environments/c1/env-1/linked"),
        )
        .unwrap();

        let files = walk(&dir.path().join("environments/c1")).unwrap();
        assert!(files.iter().all(|p| !p.starts_with(dir.path().join("environments/c1/env-1/linked"))));
    }
}
