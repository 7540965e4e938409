//! Impact search.
//!
//! Finds every parameter in the cluster that references a credential field,
//! across all entity files and all three parameter sections.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::core::config::Workspace;
use crate::core::constants::NAMESPACE_FILES;
use crate::core::creds_macro::{find_matching_keys, CredentialRef};
use crate::core::document::Document;
use crate::core::domain::{AffectedParameter, Context};
use crate::error::{Error, ErrorCode, Result};

/// The occurrence a request targets, excluded from its own report.
#[derive(Debug, Clone, Copy)]
pub struct TargetOccurrence<'a> {
    pub file: &'a Path,
    pub context: Context,
    pub parameter_key: &'a str,
}

/// A credential reference and the files that own it.
#[derive(Debug)]
pub struct ImpactQuery<'a> {
    pub credential: &'a CredentialRef,
    pub target: TargetOccurrence<'a>,
    pub environment_cred_files: Vec<String>,
    pub shared_cred_files: Vec<String>,
}

/// Whether a path names a namespace document.
pub fn is_namespace_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| NAMESPACE_FILES.contains(&n))
}

/// `name` of a document, empty when absent.
pub fn document_name(doc: &Document) -> &str {
    doc.get("name").and_then(|v| v.as_str()).unwrap_or_default()
}

/// The namespace document two levels above an application document.
///
/// # Errors
///
/// Returns `Reference` if no namespace document exists there.
pub fn sibling_namespace<'e>(
    entities: &'e BTreeMap<PathBuf, Document>,
    app_path: &Path,
) -> Result<(&'e Path, &'e Document)> {
    let dir = app_path
        .parent()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new(""));

    NAMESPACE_FILES
        .iter()
        .find_map(|name| entities.get_key_value(&dir.join(name)))
        .map(|(p, d)| (p.as_path(), d))
        .ok_or_else(|| {
            Error::reference(
                ErrorCode::FileNotFound,
                format!(
                    "failed to find a namespace file in '{}'; check that namespace.yml is present",
                    dir.display()
                ),
            )
        })
}

/// Environment a file belongs to: the segment after `environments/<cluster>/`.
pub fn environment_of(path: &Path, workspace: &Workspace) -> String {
    path.strip_prefix(workspace.cluster_dir())
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Path text starting at `environments/`, with forward slashes.
pub fn trim_to_environments(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    match normalized.find("environments/") {
        Some(idx) => normalized[idx..].to_string(),
        None => normalized,
    }
}

/// Every parameter referencing the queried credential field.
///
/// # Errors
///
/// Returns `Reference` if a hit sits in an application document without a
/// sibling namespace document.
pub fn find_affected(
    entities: &BTreeMap<PathBuf, Document>,
    workspace: &Workspace,
    query: &ImpactQuery<'_>,
) -> Result<Vec<AffectedParameter>> {
    let needles = query.credential.needles();
    let mut affected = Vec::new();

    for (path, doc) in entities {
        let is_target_file = path.as_path() == query.target.file;
        let mut hits: Vec<(Context, Vec<String>)> = Vec::new();

        for context in Context::ALL {
            let Some(section) = doc.get(context.section()) else {
                continue;
            };
            let skip = (is_target_file && context == query.target.context)
                .then_some(query.target.parameter_key);
            let keys = find_matching_keys(section, &needles, skip);
            if !keys.is_empty() {
                hits.push((context, keys));
            }
        }
        if hits.is_empty() {
            continue;
        }

        let (application, namespace) = if is_namespace_file(path) {
            (String::new(), document_name(doc).to_string())
        } else {
            let (_, ns_doc) = sibling_namespace(entities, path)?;
            (
                document_name(doc).to_string(),
                document_name(ns_doc).to_string(),
            )
        };
        let environment = environment_of(path, workspace);
        trace!(path = %path.display(), hits = hits.len(), "credential referenced");

        for (context, keys) in hits {
            for parameter_key in keys {
                affected.push(AffectedParameter {
                    environment: environment.clone(),
                    namespace: namespace.clone(),
                    application: application.clone(),
                    context,
                    parameter_key,
                    cred_id: query.credential.id.clone(),
                    environment_cred_filepath: query.environment_cred_files.clone(),
                    shared_cred_filepath: query.shared_cred_files.clone(),
                });
            }
        }
    }

    debug!(
        cred_id = %query.credential.id,
        field = %query.credential.field,
        affected = affected.len(),
        "impact search complete"
    );
    Ok(affected)
}
