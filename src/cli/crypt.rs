//! Single-file crypt commands.
//!
//! Run the configured backend on one file, the way CI jobs outside of
//! rotation need it.

use std::path::Path;

use serde_yaml::Value;

use crate::cli::output;
use crate::cli::{KeyArgs, ScopeArgs};
use crate::core::config::RepoConfig;
use crate::core::crypt::{Crypt, CryptBackend};
use crate::core::document::{self, Format};
use crate::error::{Error, ErrorCode, Result};

fn backend(scope: &ScopeArgs, keys: &KeyArgs) -> Result<CryptBackend> {
    let config = RepoConfig::load(&scope.root)?;
    CryptBackend::from_config(&config, &keys.material())
}

/// Decrypt a file in place, or print its plaintext.
pub fn decrypt(scope: &ScopeArgs, keys: &KeyArgs, file: &Path, stdout: bool) -> Result<()> {
    let crypt = backend(scope, keys)?;
    if stdout {
        let doc = crypt.decrypt(file, false)?;
        print!("{}", document::render(&doc, Format::from_path(file))?);
        return Ok(());
    }

    crypt.decrypt(file, true)?;
    output::success(&format!("decrypted {}", output::path(&file.display().to_string())));
    Ok(())
}

/// Encrypt a file in place.
pub fn encrypt(
    scope: &ScopeArgs,
    keys: &KeyArgs,
    file: &Path,
    previous: Option<&Path>,
) -> Result<()> {
    let crypt = backend(scope, keys)?;
    crypt.encrypt(file, previous)?;
    output::success(&format!(
        "encrypted {} ({})",
        output::path(&file.display().to_string()),
        crypt.name()
    ));
    Ok(())
}

/// Print one decrypted attribute.
pub fn extract(scope: &ScopeArgs, keys: &KeyArgs, file: &Path, attribute: &str) -> Result<()> {
    let crypt = backend(scope, keys)?;
    let value = crypt.extract(file, attribute)?.ok_or_else(|| {
        Error::reference(
            ErrorCode::InvalidInput,
            format!("attribute '{}' not found in {}", attribute, file.display()),
        )
    })?;

    match value {
        Value::String(s) => println!("{}", s),
        Value::Number(n) => println!("{}", n),
        Value::Bool(b) => println!("{}", b),
        other => print!("{}", document::render(&other, Format::Yaml)?),
    }
    Ok(())
}
