//! Rotation run.
//!
//! Ties the pieces together for one invocation: settings, backend, scan,
//! payload, plan, audit, then the force gate and the transactional write.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info};

use crate::core::config::{KeyMaterial, RepoConfig, Workspace};
use crate::core::crypt::{Crypt, CryptBackend};
use crate::core::document;
use crate::core::domain::RotationResult;
use crate::core::engine::{RotationEngine, RotationPlan};
use crate::core::payload;
use crate::core::scanner::Scanner;
use crate::core::writer::CredentialWriter;
use crate::error::{Error, ErrorCode, Result};

/// Inputs of one rotation run.
#[derive(Debug)]
pub struct RotationSettings {
    pub workspace: Workspace,
    pub keys: KeyMaterial,
    /// Raw `CRED_ROTATION_PAYLOAD` value.
    pub payload: String,
    /// Whether credential files may be rewritten.
    pub force: bool,
}

/// What a completed run did.
#[derive(Debug, Default)]
pub struct RotationSummary {
    pub requests: usize,
    pub results: usize,
    pub affected: usize,
    pub audit: PathBuf,
    /// Credential files rewritten.
    pub files: Vec<PathBuf>,
    pub manifest: Option<PathBuf>,
}

/// Run a rotation with the backend named by the repository settings.
///
/// # Errors
///
/// Returns the first error of any stage. A run without `force` that found
/// affected parameters ends with [`Error::DryRun`] after writing the audit.
pub fn run(settings: &RotationSettings) -> Result<RotationSummary> {
    let config = RepoConfig::load(settings.workspace.root())?;
    let backend = CryptBackend::from_config(&config, &settings.keys)?;
    run_with(settings, &config, &backend)
}

/// Run a rotation against an explicit backend.
///
/// # Errors
///
/// See [`run`].
pub fn run_with(
    settings: &RotationSettings,
    config: &RepoConfig,
    crypt: &dyn Crypt,
) -> Result<RotationSummary> {
    let started = Instant::now();
    let workspace = &settings.workspace;
    info!(
        cluster = workspace.cluster(),
        environment = workspace.environment(),
        root = %workspace.root().display(),
        backend = crypt.name(),
        "starting credential rotation"
    );

    let scan = Scanner::new(workspace, crypt, config.parallel_decrypt_threshold).scan()?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "files read");

    let requests = payload::load(&settings.payload, crypt)?;
    let plan = RotationEngine::new(&scan, workspace).plan(&requests)?;

    if plan.results.is_empty() {
        return Err(Error::validation(
            ErrorCode::InvalidState,
            "no affected parameters found for CRED_ROTATION_PAYLOAD in the current environment; nothing to rotate",
        ));
    }

    let audit = write_audit(workspace, &plan.results)?;
    let mut summary = RotationSummary {
        requests: requests.len(),
        results: plan.results.len(),
        affected: plan.affected_count(),
        audit: audit.clone(),
        ..Default::default()
    };

    if !settings.force {
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "affected parameters reported, credential files left untouched"
        );
        return Err(Error::DryRun { audit });
    }

    apply(workspace, crypt, &plan, &mut summary)?;
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        files = summary.files.len(),
        "credential rotation completed"
    );
    Ok(summary)
}

fn apply(
    workspace: &Workspace,
    crypt: &dyn Crypt,
    plan: &RotationPlan,
    summary: &mut RotationSummary,
) -> Result<()> {
    if plan.updates.is_empty() {
        error!("credential ids not found in environment or shared credential files, nothing written");
        return Ok(());
    }

    let report = CredentialWriter::new(workspace, crypt).commit(&plan.updates)?;
    summary.files = report.files;
    summary.manifest = Some(report.manifest);
    Ok(())
}

fn write_audit(workspace: &Workspace, results: &[RotationResult]) -> Result<PathBuf> {
    let path = workspace.audit_path();
    let text = serde_yaml::to_string(results)?;
    document::write_atomic(&path, text.as_bytes())?;
    info!(path = %path.display(), results = results.len(), "affected parameters written");
    Ok(path)
}
