//! Rotation requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::{Error, ErrorCode, Result};

/// Parameter category of a namespace or application document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Deployment,
    Pipeline,
    Runtime,
}

impl Context {
    pub const ALL: [Context; 3] = [Context::Deployment, Context::Pipeline, Context::Runtime];

    /// Name of the document section holding this context's parameters.
    pub fn section(&self) -> &'static str {
        match self {
            Self::Deployment => "deployParameters",
            Self::Pipeline => "e2eParameters",
            Self::Runtime => "technicalConfigurationParameters",
        }
    }

    /// Inverse of [`Context::section`], case-insensitive.
    pub fn from_section(section: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.section().eq_ignore_ascii_case(section))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Pipeline => "pipeline",
            Self::Runtime => "runtime",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Context {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(Self::Deployment),
            "pipeline" => Ok(Self::Pipeline),
            "runtime" => Ok(Self::Runtime),
            other => Err(Error::validation(
                ErrorCode::InvalidInput,
                format!(
                    "unsupported context '{}'; expected deployment, pipeline or runtime",
                    other
                ),
            )),
        }
    }
}

/// One "change this parameter's credential" entry of the payload.
#[derive(Clone)]
pub struct RotationRequest {
    pub namespace: String,
    pub application: Option<String>,
    pub context: Context,
    pub parameter_key: String,
    pub parameter_value: Zeroizing<String>,
}

impl RotationRequest {
    const REQUIRED: [&'static str; 4] = ["namespace", "parameter_key", "context", "parameter_value"];

    /// Build a request from one `rotation_items` entry.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a required key is missing or empty,
    /// or the context is unknown.
    pub fn from_value(entry: &Value) -> Result<Self> {
        let text = |key: &str| -> Option<String> {
            match entry.get(key)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }
        };

        let missing: Vec<&str> = Self::REQUIRED
            .iter()
            .copied()
            .filter(|k| text(*k).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::validation(
                ErrorCode::InvalidConfig,
                format!(
                    "missing required keys: {} in rotation item for namespace {:?}",
                    missing.join(", "),
                    entry.get("namespace").and_then(Value::as_str).unwrap_or("")
                ),
            ));
        }

        Ok(Self {
            namespace: text("namespace").unwrap_or_default(),
            application: text("application"),
            context: text("context").unwrap_or_default().parse()?,
            parameter_key: text("parameter_key").unwrap_or_default(),
            parameter_value: Zeroizing::new(text("parameter_value").unwrap_or_default()),
        })
    }

    /// Whether the request targets an application document.
    pub fn is_application(&self) -> bool {
        self.application.is_some()
    }
}

impl fmt::Debug for RotationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationRequest")
            .field("namespace", &self.namespace)
            .field("application", &self.application)
            .field("context", &self.context)
            .field("parameter_key", &self.parameter_key)
            .field("parameter_value", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for RotationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{namespace: {}, application: {}, context: {}, parameter_key: {}}}",
            self.namespace,
            self.application.as_deref().unwrap_or(""),
            self.context,
            self.parameter_key
        )
    }
}
