//! Whole-file sops backend with age keys.
//!
//! Shells out to the `sops` CLI. Every invocation runs under a hard timeout
//! and receives the age identity through its own environment only.
//!
//! ## Requirements
//!
//! - `sops` must be on `PATH`
//! - recipients (`ENVGENE_AGE_PUBLIC_KEY` / `PUBLIC_AGE_KEYS`) to encrypt
//! - an identity (`ENVGENE_AGE_PRIVATE_KEY` or the sops key file) to decrypt

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::str::FromStr;
use std::time::Duration;

use age::x25519;
use serde_yaml::Value;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use super::{exec, has_sops_metadata, Crypt};
use crate::core::constants::{
    ENV_AGE_PRIVATE_KEY, ENV_AGE_PUBLIC_KEYS, SOPS_EXIT_NOT_MODIFIED,
};
use crate::core::document::{self, Document, Format};
use crate::error::{CryptError, Result};

const ALREADY_DECRYPTED: &str = "metadata not found";
/// Variable through which the editor script receives the new plaintext path.
const EDIT_SOURCE_VAR: &str = "CREDROT_EDIT_SOURCE";
const EDITOR_SCRIPT: &str = "#!/bin/sh\n[ -n \"$1\" ] || exit 1\ncat \"$CREDROT_EDIT_SOURCE\" > \"$1\"\n";
const ALREADY_ENCRYPTED: &str = "top-level entry called 'sops'";

/// Outcome of a sops call whose stderr says the file was already in the
/// requested state.
enum Run {
    Done(Output),
    AlreadyDone,
}

/// Whole-file backend driving the `sops` CLI.
pub struct SopsCrypt {
    binary: Option<PathBuf>,
    recipients: Vec<String>,
    identity: Option<Zeroizing<String>>,
    unencrypted_regex: String,
    timeout: Duration,
}

impl SopsCrypt {
    /// Build the backend, validating key material up front.
    ///
    /// Missing keys and a missing binary are reported when a file actually
    /// needs them, so plaintext trees can be scanned without sops.
    ///
    /// # Errors
    ///
    /// Returns `CryptError::InvalidKey` for a malformed recipient or identity.
    pub fn new(
        recipients: Vec<String>,
        identity: Option<Zeroizing<String>>,
        unencrypted_regex: &str,
        timeout: Duration,
    ) -> Result<Self> {
        for recipient in &recipients {
            x25519::Recipient::from_str(recipient).map_err(|e| {
                CryptError::InvalidKey(format!("invalid age recipient '{}': {}", recipient, e))
            })?;
        }
        if let Some(key) = &identity {
            x25519::Identity::from_str(key.as_str())
                .map_err(|e| CryptError::InvalidKey(format!("invalid age identity: {}", e)))?;
        }

        let binary = which::which("sops").ok();
        debug!(
            binary = ?binary,
            recipients = recipients.len(),
            identity = identity.is_some(),
            "sops backend configured"
        );

        Ok(Self {
            binary,
            recipients,
            identity,
            unencrypted_regex: unencrypted_regex.to_string(),
            timeout,
        })
    }

    fn command(&self) -> Result<Command> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| CryptError::ToolNotFound("sops".to_string()))?;
        let mut cmd = Command::new(binary);
        if let Some(identity) = &self.identity {
            cmd.env("SOPS_AGE_KEY", identity.as_str());
        }
        Ok(cmd)
    }

    fn require_identity(&self) -> Result<()> {
        if self.identity.is_none() {
            return Err(CryptError::MissingKey(ENV_AGE_PRIVATE_KEY).into());
        }
        Ok(())
    }

    fn recipients_arg(&self) -> Result<String> {
        if self.recipients.is_empty() {
            return Err(CryptError::MissingKey(ENV_AGE_PUBLIC_KEYS).into());
        }
        Ok(self.recipients.join(","))
    }

    /// Run sops, mapping "already in that state" stderr to [`Run::AlreadyDone`].
    fn run(&self, cmd: Command, accept: &[i32]) -> Result<Run> {
        let output = exec::run_with_timeout(cmd, self.timeout)?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if stderr.contains(ALREADY_DECRYPTED) || stderr.contains(ALREADY_ENCRYPTED) {
            return Ok(Run::AlreadyDone);
        }

        let code = output.status.code();
        if output.status.success() || code.is_some_and(|c| accept.contains(&c)) {
            return Ok(Run::Done(output));
        }

        Err(CryptError::CommandFailed {
            command: "sops".to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        }
        .into())
    }

    fn parse_stdout(output: &Output, path: &Path) -> Result<Document> {
        let text = String::from_utf8(output.stdout.clone()).map_err(|e| {
            CryptError::DecryptionFailed {
                path: path.to_path_buf(),
                reason: format!("sops output is not UTF-8: {}", e),
            }
        })?;
        document::parse(&text, Format::from_path(path))
    }

    /// Re-encrypt `path` by editing a copy of `previous` so unchanged values
    /// keep their ciphertext.
    fn encrypt_over_previous(&self, path: &Path, previous: &Path) -> Result<()> {
        self.require_identity()?;
        let format = Format::from_path(path);

        let work = tempfile::Builder::new()
            .prefix("credrot-sops-")
            .suffix(format.suffix())
            .tempfile()?
            .into_temp_path();
        fs::copy(previous, &work)?;

        let editor = tempfile::Builder::new()
            .prefix("credrot-editor-")
            .suffix(".sh")
            .tempfile()?
            .into_temp_path();
        // the handle must be closed before sops can exec the script
        fs::write(&editor, EDITOR_SCRIPT)?;
        make_executable(&editor)?;

        // `sops <file>` opens the editor on every sops version
        let mut cmd = self.command()?;
        cmd.env("EDITOR", &*editor)
            .env(EDIT_SOURCE_VAR, path)
            .arg(&*work);

        trace!(path = %path.display(), previous = %previous.display(), "sops edit");
        match self.run(cmd, &[SOPS_EXIT_NOT_MODIFIED])? {
            Run::Done(_) => {}
            Run::AlreadyDone => {
                return Err(CryptError::EncryptionFailed {
                    path: path.to_path_buf(),
                    reason: "previous file is not sops-encrypted".to_string(),
                }
                .into())
            }
        }

        let sealed = fs::read(&work)?;
        document::write_atomic(path, &sealed)
    }

    fn encrypt_fresh(&self, path: &Path) -> Result<()> {
        let mut cmd = self.command()?;
        cmd.args(["--encrypt", "--unencrypted-regex"])
            .arg(&self.unencrypted_regex)
            .arg("--age")
            .arg(self.recipients_arg()?)
            .arg("--in-place")
            .arg(path);

        match self.run(cmd, &[])? {
            Run::Done(_) => Ok(()),
            Run::AlreadyDone => {
                warn!(path = %path.display(), "file is already encrypted");
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// `a.b.c` as a sops extract expression: `["a"]["b"]["c"]`.
pub fn extract_expression(attribute: &str) -> String {
    attribute
        .split('.')
        .map(|part| format!("[\"{}\"]", part))
        .collect()
}

impl Crypt for SopsCrypt {
    fn name(&self) -> &'static str {
        "sops"
    }

    fn is_encrypted(&self, path: &Path) -> Result<bool> {
        Ok(has_sops_metadata(&document::read(path)?))
    }

    fn decrypt(&self, path: &Path, in_place: bool) -> Result<Document> {
        let current = document::read(path)?;
        if document::is_empty(&current) {
            debug!(path = %path.display(), "file is empty, skipping decryption");
            return Ok(current);
        }
        if !has_sops_metadata(&current) {
            warn!(path = %path.display(), "file is not encrypted");
            return Ok(current);
        }
        self.require_identity()?;

        let mut cmd = self.command()?;
        cmd.arg("--decrypt");
        if in_place {
            cmd.arg("--in-place");
        }
        cmd.arg(path);

        let output = match self.run(cmd, &[])? {
            Run::Done(output) => output,
            Run::AlreadyDone => {
                warn!(path = %path.display(), "file was already decrypted");
                return document::read(path);
            }
        };

        if in_place {
            info!(path = %path.display(), "file decrypted");
            document::read(path)
        } else {
            Self::parse_stdout(&output, path)
        }
    }

    fn encrypt(&self, path: &Path, previous: Option<&Path>) -> Result<Document> {
        let current = document::read(path)?;
        if document::is_empty(&current) {
            debug!(path = %path.display(), "file is empty, skipping encryption");
            return Ok(current);
        }
        if has_sops_metadata(&current) {
            warn!(path = %path.display(), "file is already encrypted");
            return Ok(current);
        }

        let previous = match previous {
            Some(p) if p.is_file() && self.is_encrypted(p)? => Some(p),
            _ => None,
        };
        match previous {
            Some(prev) => self.encrypt_over_previous(path, prev)?,
            None => self.encrypt_fresh(path)?,
        }

        info!(path = %path.display(), minimized = previous.is_some(), "file encrypted");
        document::read(path)
    }

    fn extract(&self, path: &Path, attribute: &str) -> Result<Option<Value>> {
        let current = document::read(path)?;
        if !has_sops_metadata(&current) {
            warn!(path = %path.display(), "file is not encrypted, reading attribute directly");
            return Ok(document::lookup(&current, attribute).cloned());
        }
        self.require_identity()?;

        let mut cmd = self.command()?;
        cmd.args(["--decrypt", "--extract"])
            .arg(extract_expression(attribute))
            .arg(path);

        match self.run(cmd, &[])? {
            Run::Done(output) => {
                let text = String::from_utf8_lossy(&output.stdout);
                let value: Value = serde_yaml::from_str(&text)?;
                Ok(Some(value))
            }
            Run::AlreadyDone => Ok(document::lookup(&current, attribute).cloned()),
        }
    }
}
