//! Rotate command.
//!
//! Runs one rotation batch and prints what it found and changed.

use crate::cli::output;
use crate::cli::{KeyArgs, ScopeArgs};
use crate::core::config::parse_force;
use crate::core::constants;
use crate::core::rotate::{self, RotationSettings};
use crate::error::{Error, Result};

/// Execute a rotation run.
pub fn execute(scope: &ScopeArgs, keys: &KeyArgs, payload: String, force: &str) -> Result<()> {
    let settings = RotationSettings {
        workspace: scope.workspace()?,
        keys: keys.material(),
        payload,
        force: parse_force(force),
    };

    let summary = match rotate::run(&settings) {
        Ok(summary) => summary,
        Err(e @ Error::DryRun { .. }) => {
            output::hint(&format!(
                "set {}=true to update credential files",
                constants::ENV_FORCE
            ));
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    output::section("Credential Rotation");
    output::kv("requests:", summary.requests);
    output::kv("targets: ", summary.results);
    output::kv("affected:", summary.affected);
    output::kv("audit:   ", output::path(&summary.audit.display().to_string()));
    if let Some(manifest) = &summary.manifest {
        output::kv("manifest:", output::path(&manifest.display().to_string()));
    }

    if summary.files.is_empty() {
        output::warn("no credential file defines the requested credentials");
        return Ok(());
    }

    println!();
    for file in &summary.files {
        output::list_item(&file.display().to_string());
    }
    output::success(&format!(
        "{} credential file(s) updated",
        summary.files.len()
    ));
    Ok(())
}
