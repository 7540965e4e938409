//! Transactional credential file writer.
//!
//! Applies pending field updates to every owning credential file. Files are
//! committed in parallel; if any commit fails, every file is restored to the
//! bytes it held before the run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::core::config::Workspace;
use crate::core::crypt::Crypt;
use crate::core::document::{self, Document, Format};
use crate::core::domain::{PendingCredentialUpdate, PendingUpdates};
use crate::core::pool;
use crate::error::{Error, ErrorCode, Result};

/// One credential file ready to commit.
struct CommitJob {
    path: PathBuf,
    updated: Document,
    /// Raw bytes on disk before the run.
    previous: Vec<u8>,
    /// Whether `previous` is ciphertext of the active backend.
    was_encrypted: bool,
}

/// Entry of the rotated files manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// Path relative to `environments/`.
    pub path: String,
    pub sha256: String,
}

/// Rotated files manifest, written next to the cluster directories.
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub rotated_at: DateTime<Utc>,
    pub cluster: String,
    pub environment: String,
    pub files: Vec<ManifestEntry>,
}

/// Outcome of a successful commit.
#[derive(Debug)]
pub struct CommitReport {
    pub files: Vec<PathBuf>,
    pub manifest: PathBuf,
}

/// Writes credential updates through the active crypt backend.
pub struct CredentialWriter<'a> {
    workspace: &'a Workspace,
    crypt: &'a dyn Crypt,
}

impl<'a> CredentialWriter<'a> {
    pub fn new(workspace: &'a Workspace, crypt: &'a dyn Crypt) -> Self {
        Self { workspace, crypt }
    }

    /// Apply every update, all files or none.
    ///
    /// # Errors
    ///
    /// - `Validation` if an update names a missing id or `data` block.
    /// - `Runtime` if any file failed to commit; all files are rolled back.
    pub fn commit(&self, updates: &PendingUpdates) -> Result<CommitReport> {
        let mut jobs = Vec::with_capacity(updates.len());
        for (path, file_updates) in updates {
            jobs.push(self.prepare(path, file_updates)?);
        }
        if jobs.is_empty() {
            info!("no credential files to update");
            return Ok(CommitReport {
                files: Vec::new(),
                manifest: self.write_manifest(&[])?,
            });
        }

        let backups: Vec<(PathBuf, Vec<u8>)> = jobs
            .iter()
            .map(|j| (j.path.clone(), j.previous.clone()))
            .collect();
        let paths: Vec<PathBuf> = backups.iter().map(|(p, _)| p.clone()).collect();

        let workers = pool::worker_count(jobs.len());
        debug!(files = jobs.len(), workers, "committing credential files");
        let crypt = self.crypt;
        let outcomes = pool::run(jobs, workers, |job| {
            let path = job.path.clone();
            (path, commit_one(crypt, job))
        });

        let failures: Vec<(PathBuf, Error)> = outcomes
            .into_iter()
            .filter_map(|(path, outcome)| outcome.err().map(|e| (path, e)))
            .collect();

        if !failures.is_empty() {
            for (path, e) in &failures {
                error!(path = %path.display(), error = %e, "credential file commit failed");
            }
            self.rollback(backups);
            error!("rotation not applied, credential files restored");

            let detail = failures
                .iter()
                .map(|(path, e)| format!("{}: {}", path.display(), e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::runtime(
                ErrorCode::Runtime,
                format!(
                    "failed to update {} of {} credential file(s), rotation not applied: {}",
                    failures.len(),
                    paths.len(),
                    detail
                ),
            ));
        }

        let manifest = self.write_manifest(&paths)?;
        info!(files = paths.len(), "credential files updated");
        Ok(CommitReport {
            files: paths,
            manifest,
        })
    }

    /// Build the updated document for one file and capture its current bytes.
    fn prepare(&self, path: &Path, updates: &[PendingCredentialUpdate]) -> Result<CommitJob> {
        let Some(first) = updates.first() else {
            return Err(Error::runtime(
                ErrorCode::Runtime,
                format!("no updates queued for {}", path.display()),
            ));
        };

        let mut updated: Document = (*first.snapshot).clone();
        for update in updates {
            apply_update(&mut updated, update, path)?;
        }

        let previous = fs::read(path)?;
        let was_encrypted = self.crypt.is_encrypted(path)?;
        debug!(
            path = %path.display(),
            updates = updates.len(),
            was_encrypted,
            "prepared credential file"
        );

        Ok(CommitJob {
            path: path.to_path_buf(),
            updated,
            previous,
            was_encrypted,
        })
    }

    /// Restore every file to its captured bytes. Failures are logged.
    fn rollback(&self, backups: Vec<(PathBuf, Vec<u8>)>) {
        let workers = pool::worker_count(backups.len());
        warn!(files = backups.len(), "rolling back credential files");
        let results = pool::run(backups, workers, |(path, bytes)| {
            let outcome = document::write_atomic(&path, &bytes);
            (path, outcome)
        });
        for (path, outcome) in results {
            if let Err(e) = outcome {
                error!(path = %path.display(), error = %e, "failed to restore credential file");
            }
        }
    }

    fn write_manifest(&self, paths: &[PathBuf]) -> Result<PathBuf> {
        let environments = self.workspace.environments_dir();
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(path)?;
            let relative = path.strip_prefix(&environments).unwrap_or(path);
            entries.push(ManifestEntry {
                path: relative.to_string_lossy().replace('\\', "/"),
                sha256: format!("{:x}", Sha256::digest(&bytes)),
            });
        }

        let manifest = Manifest {
            rotated_at: Utc::now(),
            cluster: self.workspace.cluster().to_string(),
            environment: self.workspace.environment().to_string(),
            files: entries,
        };
        let path = self.workspace.manifest_path();
        let text = serde_yaml::to_string(&manifest)?;
        document::write_atomic(&path, text.as_bytes())?;
        debug!(path = %path.display(), files = manifest.files.len(), "manifest written");
        Ok(path)
    }
}

/// Write the new value into `<id>.data.<field>`.
fn apply_update(doc: &mut Document, update: &PendingCredentialUpdate, path: &Path) -> Result<()> {
    let definition = doc
        .as_mapping_mut()
        .and_then(|m| m.get_mut(update.credential_id.as_str()))
        .ok_or_else(|| {
            Error::validation(
                ErrorCode::InvalidConfig,
                format!(
                    "credential id '{}' not found in {}",
                    update.credential_id,
                    path.display()
                ),
            )
        })?;

    let data: &mut Mapping = definition
        .as_mapping_mut()
        .and_then(|m| m.get_mut("data"))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| {
            Error::validation(
                ErrorCode::InvalidConfig,
                format!(
                    "section 'data' missing for credential id '{}' in {}",
                    update.credential_id,
                    path.display()
                ),
            )
        })?;

    data.insert(
        Value::String(update.field.as_str().to_string()),
        Value::String(update.new_value.to_string()),
    );
    Ok(())
}

/// Write plaintext, then encrypt through the backend. Files that held
/// ciphertext are encrypted over their previous content.
fn commit_one(crypt: &dyn Crypt, job: CommitJob) -> Result<()> {
    document::write(&job.path, &job.updated)?;
    if !job.was_encrypted {
        crypt.encrypt(&job.path, None)?;
        return Ok(());
    }

    let suffix = Format::from_path(&job.path).suffix();
    let mut previous = tempfile::Builder::new()
        .prefix(".credrot-previous-")
        .suffix(suffix)
        .tempfile()?;
    previous.write_all(&job.previous)?;
    previous.flush()?;

    crypt.encrypt(&job.path, Some(previous.path()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypt::PlainCrypt;
    use crate::core::domain::Field;
    use crate::error::CryptError;
    use std::sync::Arc;
    use tempfile::TempDir;
    use zeroize::Zeroizing;

    const CREDS: &str = "db-cred:\n  type: usernamePassword\n  data:\n    username: u\n    password: old\n";

    fn setup(files: &[&str]) -> (TempDir, Workspace, Vec<PathBuf>) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), "c1", "env-1").unwrap();
        let paths = files
            .iter()
            .map(|rel| {
                let path = dir.path().join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, CREDS).unwrap();
                path
            })
            .collect();
        (dir, ws, paths)
    }

    fn pending(paths: &[PathBuf], id: &str, value: &str) -> PendingUpdates {
        let snapshot: Arc<Document> = Arc::new(serde_yaml::from_str(CREDS).unwrap());
        paths
            .iter()
            .map(|p| {
                (
                    p.clone(),
                    vec![PendingCredentialUpdate {
                        credential_id: id.to_string(),
                        field: Field::Password,
                        new_value: Zeroizing::new(value.to_string()),
                        snapshot: snapshot.clone(),
                    }],
                )
            })
            .collect()
    }

    /// Reports every file encrypted and fails to encrypt one of them.
    struct FailingCrypt {
        fail_on: PathBuf,
    }

    impl Crypt for FailingCrypt {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn is_encrypted(&self, _path: &Path) -> Result<bool> {
            Ok(true)
        }

        fn decrypt(&self, path: &Path, _in_place: bool) -> Result<Document> {
            document::read(path)
        }

        fn encrypt(&self, path: &Path, _previous: Option<&Path>) -> Result<Document> {
            if path == self.fail_on {
                return Err(CryptError::EncryptionFailed {
                    path: path.to_path_buf(),
                    reason: "injected".to_string(),
                }
                .into());
            }
            document::read(path)
        }

        fn extract(&self, _path: &Path, _attribute: &str) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    /// Treats one file as ciphertext and records every encrypt call.
    struct RecordingCrypt {
        encrypted: PathBuf,
        calls: std::sync::Mutex<Vec<(PathBuf, bool)>>,
    }

    impl Crypt for RecordingCrypt {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn is_encrypted(&self, path: &Path) -> Result<bool> {
            Ok(path == self.encrypted)
        }

        fn decrypt(&self, path: &Path, _in_place: bool) -> Result<Document> {
            document::read(path)
        }

        fn encrypt(&self, path: &Path, previous: Option<&Path>) -> Result<Document> {
            if let Some(previous) = previous {
                assert_eq!(fs::read_to_string(previous).unwrap(), CREDS);
            }
            self.calls
                .lock()
                .unwrap()
                .push((path.to_path_buf(), previous.is_some()));
            document::read(path)
        }

        fn extract(&self, _path: &Path, _attribute: &str) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    #[test]
    fn test_plaintext_files_are_encrypted_too() {
        let (_dir, ws, paths) = setup(&[
            "environments/credentials/sealed.yml",
            "environments/credentials/plain.yml",
        ]);
        let crypt = RecordingCrypt {
            encrypted: paths[0].clone(),
            calls: Default::default(),
        };

        CredentialWriter::new(&ws, &crypt)
            .commit(&pending(&paths, "db-cred", "new"))
            .unwrap();

        let mut calls = crypt.calls.into_inner().unwrap();
        calls.sort();
        let mut expected = vec![(paths[0].clone(), true), (paths[1].clone(), false)];
        expected.sort();
        assert_eq!(calls, expected);
    }

    #[test]
    fn test_commit_updates_every_file_and_writes_manifest() {
        let (dir, ws, paths) = setup(&[
            "environments/credentials/shared.yml",
            "environments/c1/env-1/Credentials/credentials.yml",
        ]);
        let report = CredentialWriter::new(&ws, &PlainCrypt)
            .commit(&pending(&paths, "db-cred", "new"))
            .unwrap();

        assert_eq!(report.files.len(), 2);
        for path in &paths {
            let doc = document::read(path).unwrap();
            assert_eq!(document::lookup(&doc, "db-cred.data.password").and_then(Value::as_str), Some("new"));
            assert_eq!(document::lookup(&doc, "db-cred.data.username").and_then(Value::as_str), Some("u"));
        }

        let manifest = fs::read_to_string(dir.path().join("environments/rotated_credential_files.yml")).unwrap();
        assert!(manifest.contains("rotated_at:"));
        assert!(manifest.contains("environment: env-1"));
        assert!(manifest.contains("path: credentials/shared.yml"));
        assert!(manifest.contains("path: c1/env-1/Credentials/credentials.yml"));
        let expected = format!("{:x}", Sha256::digest(fs::read(&paths[0]).unwrap()));
        assert!(manifest.contains(&expected));
    }

    #[test]
    fn test_failure_restores_every_file() {
        let (dir, ws, paths) = setup(&[
            "environments/credentials/a.yml",
            "environments/credentials/b.yml",
            "environments/credentials/c.yml",
        ]);
        let crypt = FailingCrypt {
            fail_on: paths[1].clone(),
        };

        let err = CredentialWriter::new(&ws, &crypt)
            .commit(&pending(&paths, "db-cred", "new"))
            .unwrap_err();

        assert!(matches!(err, Error::Runtime { .. }));
        assert!(err.to_string().contains("rotation not applied"));
        for path in &paths {
            assert_eq!(fs::read_to_string(path).unwrap(), CREDS);
        }
        assert!(!dir.path().join("environments/rotated_credential_files.yml").exists());
    }

    #[test]
    fn test_missing_data_block_is_rejected_before_writing() {
        let (_dir, ws, paths) = setup(&["environments/credentials/a.yml"]);
        let mut updates = pending(&paths, "db-cred", "new");
        let broken: Document = serde_yaml::from_str("db-cred:\n  type: secret\n").unwrap();
        for list in updates.values_mut() {
            list[0].snapshot = Arc::new(broken.clone());
        }

        let err = CredentialWriter::new(&ws, &PlainCrypt)
            .commit(&updates)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("section 'data' missing"));
        assert_eq!(fs::read_to_string(&paths[0]).unwrap(), CREDS);
    }

    #[test]
    fn test_unknown_id_is_rejected() {
        let (_dir, ws, paths) = setup(&["environments/credentials/a.yml"]);
        let err = CredentialWriter::new(&ws, &PlainCrypt)
            .commit(&pending(&paths, "other", "new"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn test_json_file_keeps_format() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path(), "c1", "env-1").unwrap();
        let path = dir.path().join("environments/c1/credentials/shared.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"db-cred": {"type": "usernamePassword", "data": {"password": "old"}}}"#).unwrap();

        let snapshot = Arc::new(document::read(&path).unwrap());
        let mut updates = PendingUpdates::new();
        updates.insert(
            path.clone(),
            vec![PendingCredentialUpdate {
                credential_id: "db-cred".to_string(),
                field: Field::Password,
                new_value: Zeroizing::new("new".to_string()),
                snapshot,
            }],
        );
        CredentialWriter::new(&ws, &PlainCrypt).commit(&updates).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["db-cred"]["data"]["password"], "new");
    }
}
