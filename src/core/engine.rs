//! Rotation engine.
//!
//! Turns a batch of requests into an audit report and the credential file
//! writes needed to apply it. Requests run in order against one immutable
//! scan; the first failure aborts the whole batch.

use std::path::Path;

use tracing::{debug, info};

use crate::core::config::Workspace;
use crate::core::constants::NAMESPACES_DIR;
use crate::core::creds_macro::extract_credential;
use crate::core::document::Document;
use crate::core::domain::{
    Context, PendingCredentialUpdate, PendingUpdates, RotationRequest, RotationResult,
    TargetParameter,
};
use crate::core::scanner::ScanResult;
use crate::core::search::{
    document_name, find_affected, is_namespace_file, sibling_namespace, trim_to_environments,
    ImpactQuery, TargetOccurrence,
};
use crate::error::{Error, ErrorCode, Result};

/// Output of planning a batch.
#[derive(Debug, Default)]
pub struct RotationPlan {
    /// One entry per request with at least one affected parameter.
    pub results: Vec<RotationResult>,
    /// Field writes grouped by credential file.
    pub updates: PendingUpdates,
}

impl RotationPlan {
    pub fn affected_count(&self) -> usize {
        self.results.iter().map(|r| r.affected_parameters.len()).sum()
    }

    pub fn update_count(&self) -> usize {
        self.updates.values().map(Vec::len).sum()
    }
}

/// Resolves requests against a scanned cluster.
pub struct RotationEngine<'a> {
    scan: &'a ScanResult,
    workspace: &'a Workspace,
}

impl<'a> RotationEngine<'a> {
    pub fn new(scan: &'a ScanResult, workspace: &'a Workspace) -> Self {
        Self { scan, workspace }
    }

    /// Plan every request in order.
    ///
    /// # Errors
    ///
    /// Any request failure aborts the batch as a `Runtime` error carrying the
    /// request and the original code.
    pub fn plan(&self, requests: &[RotationRequest]) -> Result<RotationPlan> {
        let mut plan = RotationPlan::default();

        for request in requests {
            match self.process(request, &mut plan.updates) {
                Ok(Some(result)) => plan.results.push(result),
                Ok(None) => {}
                Err(e) => {
                    return Err(Error::runtime(
                        e.code(),
                        format!("failed to process request {}: {}", request, e.message()),
                    ))
                }
            }
        }

        info!(
            requests = requests.len(),
            results = plan.results.len(),
            affected = plan.affected_count(),
            files = plan.updates.len(),
            "batch planned"
        );
        Ok(plan)
    }

    fn process(
        &self,
        request: &RotationRequest,
        updates: &mut PendingUpdates,
    ) -> Result<Option<RotationResult>> {
        if request.is_application() && request.context == Context::Pipeline {
            return Err(Error::validation(
                ErrorCode::InvalidInput,
                format!(
                    "unsupported context 'pipeline' for parameter '{}'; it is not valid for application-level parameters",
                    request.parameter_key
                ),
            ));
        }

        info!(
            namespace = %request.namespace,
            application = request.application.as_deref().unwrap_or(""),
            parameter_key = %request.parameter_key,
            context = %request.context,
            "processing request"
        );

        let (target_file, target_doc) = self.resolve_target(request)?;
        let section_name = request.context.section();
        let section = target_doc.get(section_name).ok_or_else(|| {
            Error::validation(
                ErrorCode::InvalidInput,
                format!(
                    "context {} ({}) not found in {} for key {}",
                    request.context,
                    section_name,
                    target_file.display(),
                    request.parameter_key
                ),
            )
        })?;

        let credential = extract_credential(&request.parameter_key, section, None)?;
        debug!(cred_id = %credential.id, field = %credential.field, "credential resolved");

        let (shared, environment) = self.scan.owners(&credential.id);
        for file in shared.iter().chain(environment.iter()) {
            updates
                .entry(file.path().to_path_buf())
                .or_default()
                .push(PendingCredentialUpdate {
                    credential_id: credential.id.clone(),
                    field: credential.field,
                    new_value: request.parameter_value.clone(),
                    snapshot: file.content().clone(),
                });
        }
        if shared.is_empty() && environment.is_empty() {
            debug!(cred_id = %credential.id, "no credential file defines this id");
        }

        let query = ImpactQuery {
            credential: &credential,
            target: TargetOccurrence {
                file: target_file,
                context: request.context,
                parameter_key: &request.parameter_key,
            },
            environment_cred_files: environment
                .iter()
                .map(|f| trim_to_environments(f.path()))
                .collect(),
            shared_cred_files: shared
                .iter()
                .map(|f| trim_to_environments(f.path()))
                .collect(),
        };
        let affected = find_affected(&self.scan.entities, self.workspace, &query)?;
        info!(
            parameter_key = %request.parameter_key,
            affected = affected.len(),
            "request processed"
        );

        if affected.is_empty() {
            info!(
                parameter_key = %request.parameter_key,
                "no affected parameters for this request"
            );
            return Ok(None);
        }

        Ok(Some(RotationResult {
            target_parameter: TargetParameter {
                environment: self.workspace.environment().to_string(),
                namespace: request.namespace.clone(),
                application: request.application.clone().unwrap_or_default(),
                context: request.context,
                parameter_key: request.parameter_key.clone(),
                cred_field: credential.field,
            },
            affected_parameters: affected,
        }))
    }

    /// Namespace or application document a request points at, within the
    /// current environment.
    ///
    /// # Errors
    ///
    /// Returns `Reference` if no document matches, or an application has no
    /// sibling namespace document.
    pub fn resolve_target(&self, request: &RotationRequest) -> Result<(&'a Path, &'a Document)> {
        let namespaces = self.workspace.env_dir().join(NAMESPACES_DIR);
        let in_env = self
            .scan
            .entities
            .iter()
            .filter(|(path, _)| path.starts_with(&namespaces));

        let found = match &request.application {
            None => in_env
                .filter(|(path, _)| is_namespace_file(path))
                .find(|(_, doc)| document_name(doc) == request.namespace),
            Some(app) => {
                let mut found = None;
                for (path, doc) in in_env {
                    if is_namespace_file(path) || document_name(doc) != app.as_str() {
                        continue;
                    }
                    let (_, ns_doc) = sibling_namespace(&self.scan.entities, path)?;
                    if document_name(ns_doc) == request.namespace {
                        found = Some((path, doc));
                        break;
                    }
                }
                found
            }
        };

        found
            .map(|(path, doc)| (path.as_path(), doc))
            .ok_or_else(|| {
                Error::reference(
                    ErrorCode::FileNotFound,
                    format!(
                        "target namespace/application file not found in environment {} for parameter key {}",
                        self.workspace.environment(),
                        request.parameter_key
                    ),
                )
            })
    }
}
