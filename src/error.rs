//! Error types.
//!
//! Rotation failures fall into four kinds (validation, reference, type and
//! runtime), each carrying a stable machine-readable [`ErrorCode`]. Backend
//! and configuration failures have their own enums and are wrapped.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stable error codes reported with every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed configuration, payload or backend setup.
    InvalidConfig,
    /// A request references something in a way that is not allowed.
    InvalidInput,
    /// The run reached a terminal state (nothing to do, dry run).
    InvalidState,
    /// A value had an unexpected type.
    InvalidDataType,
    /// An index was out of bounds.
    OutOfRange,
    /// A required file or document is missing.
    FileNotFound,
    /// The repository layout is not what was expected.
    InvalidPath,
    /// Unexpected failure while processing.
    Runtime,
}

impl ErrorCode {
    /// Code as printed in messages and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "CREDROT-4002",
            Self::InvalidInput => "CREDROT-4003",
            Self::InvalidState => "CREDROT-4004",
            Self::InvalidDataType => "CREDROT-3002",
            Self::OutOfRange => "CREDROT-3003",
            Self::FileNotFound => "CREDROT-8001",
            Self::InvalidPath => "CREDROT-8003",
            Self::Runtime => "CREDROT-5000",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error.
#[derive(Error, Debug)]
pub enum Error {
    /// Input or state failed validation.
    #[error("[{code}] {message}")]
    Validation { code: ErrorCode, message: String },

    /// A referenced file, document, key or credential does not exist.
    #[error("[{code}] {message}")]
    Reference { code: ErrorCode, message: String },

    /// A value exists but has the wrong shape.
    #[error("[{code}] {message}")]
    Type { code: ErrorCode, message: String },

    /// Wraps a failure that aborted the batch.
    #[error("[{code}] {message}")]
    Runtime { code: ErrorCode, message: String },

    /// Affected parameters were reported but mutation was not enabled.
    #[error(
        "[{}] affected parameters were written to {}; credential updates are skipped because forced rotation is not enabled",
        ErrorCode::InvalidState,
        audit.display()
    )]
    DryRun { audit: PathBuf },

    #[error(transparent)]
    Crypt(#[from] CryptError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn reference(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Reference {
            code,
            message: message.into(),
        }
    }

    pub fn type_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Type {
            code,
            message: message.into(),
        }
    }

    pub fn runtime(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Runtime {
            code,
            message: message.into(),
        }
    }

    /// Machine-readable code for any variant.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. }
            | Self::Reference { code, .. }
            | Self::Type { code, .. }
            | Self::Runtime { code, .. } => *code,
            Self::DryRun { .. } => ErrorCode::InvalidState,
            Self::Crypt(_) | Self::Config(_) | Self::Yaml(_) | Self::Json(_) => {
                ErrorCode::InvalidConfig
            }
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            Self::Io(_) => ErrorCode::Runtime,
        }
    }

    /// Message without the code prefix, for wrapping.
    pub fn message(&self) -> String {
        match self {
            Self::Validation { message, .. }
            | Self::Reference { message, .. }
            | Self::Type { message, .. }
            | Self::Runtime { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Encryption backend errors.
#[derive(Error, Debug)]
pub enum CryptError {
    #[error("encryption failed for {path}: {reason}")]
    EncryptionFailed { path: PathBuf, reason: String },

    #[error("decryption failed for {path}: {reason}")]
    DecryptionFailed { path: PathBuf, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("missing key material: {0} is not set")]
    MissingKey(&'static str),

    #[error("{0} not found on PATH")]
    ToolNotFound(String),

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("crypt is disabled but {0} is encrypted")]
    UnexpectedCiphertext(PathBuf),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required settings: {0}")]
    Missing(String),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
