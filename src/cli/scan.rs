//! Scan command.
//!
//! Shows how the repository is classified without changing anything.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::output;
use crate::cli::{KeyArgs, ScopeArgs};
use crate::core::config::RepoConfig;
use crate::core::crypt::{Crypt, CryptBackend};
use crate::core::domain::CredentialFile;
use crate::core::scanner::Scanner;
use crate::error::Result;

#[derive(Serialize)]
struct CredentialEntry {
    path: PathBuf,
    encrypted: bool,
    ids: Vec<String>,
}

#[derive(Serialize)]
struct ScanReport {
    backend: &'static str,
    entities: Vec<PathBuf>,
    env_definitions: Vec<PathBuf>,
    shared_credentials: Vec<CredentialEntry>,
    environment_credentials: Vec<CredentialEntry>,
    unresolved: Vec<String>,
}

fn entry(root: &Path, file: &CredentialFile) -> CredentialEntry {
    let ids = file
        .content()
        .as_mapping()
        .map(|m| m.keys().filter_map(|k| k.as_str()).map(String::from).collect())
        .unwrap_or_default();
    CredentialEntry {
        path: relative(root, file.path()),
        encrypted: file.is_encrypted(),
        ids,
    }
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Scan the cluster and print the classification.
pub fn execute(scope: &ScopeArgs, keys: &KeyArgs, json: bool) -> Result<()> {
    let workspace = scope.workspace()?;
    let config = RepoConfig::load(workspace.root())?;
    let backend = CryptBackend::from_config(&config, &keys.material())?;
    let scan = Scanner::new(&workspace, &backend, config.parallel_decrypt_threshold).scan()?;

    let root = workspace.root();
    let report = ScanReport {
        backend: backend.name(),
        entities: scan.entities.keys().map(|p| relative(root, p)).collect(),
        env_definitions: scan.env_definitions.keys().map(|p| relative(root, p)).collect(),
        shared_credentials: scan
            .shared_credentials
            .values()
            .map(|f| entry(root, f))
            .collect(),
        environment_credentials: scan
            .environment_credentials
            .values()
            .map(|f| entry(root, f))
            .collect(),
        unresolved: scan.unresolved.clone(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    output::section("Scan");
    output::kv("backend:     ", report.backend);
    output::kv("entities:    ", report.entities.len());
    output::kv("definitions: ", report.env_definitions.len());

    for (title, files) in [
        ("Shared credentials", &report.shared_credentials),
        ("Environment credentials", &report.environment_credentials),
    ] {
        output::section(title);
        if files.is_empty() {
            output::dimmed("none");
        }
        for file in files {
            let marker = if file.encrypted { " (encrypted)" } else { "" };
            output::list_item(&format!(
                "{}{}  [{}]",
                output::path(&file.path.display().to_string()),
                marker,
                file.ids.join(", ")
            ));
        }
    }

    for name in &report.unresolved {
        output::warn(&format!("shared credential file '{}' not found", name));
    }
    Ok(())
}
