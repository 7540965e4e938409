//! Command-line interface.

pub mod completions;
pub mod crypt;
pub mod output;
pub mod rotate;
pub mod scan;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::core::config::{KeyMaterial, Workspace};
use crate::core::constants;
use crate::error::{ConfigError, Result};

/// credrot - Rotate credentials across an environment configuration repository.
#[derive(Parser)]
#[command(
    name = "credrot",
    about = "Rotate credentials across an environment configuration repository",
    version
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(flatten)]
    pub scope: ScopeArgs,

    #[command(flatten)]
    pub keys: KeyArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Which part of the repository a command works on.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Repository root
    #[arg(long, env = constants::ENV_WORKSPACE, default_value = ".", global = true)]
    pub root: PathBuf,

    /// Cluster directory under environments/
    #[arg(long, env = constants::ENV_CLUSTER_NAME, global = true)]
    pub cluster: Option<String>,

    /// Environment directory under the cluster
    #[arg(long = "env", env = constants::ENV_ENV_NAME, global = true)]
    pub environment: Option<String>,
}

impl ScopeArgs {
    /// Workspace for commands that need a cluster and environment.
    pub fn workspace(&self) -> Result<Workspace> {
        Workspace::new(
            self.root.clone(),
            self.cluster.as_deref().unwrap_or_default(),
            self.environment.as_deref().unwrap_or_default(),
        )
    }
}

/// Key material, normally supplied by CI variables.
#[derive(Args, Clone)]
pub struct KeyArgs {
    /// age recipient for sops encryption
    #[arg(long, env = constants::ENV_AGE_PUBLIC_KEY, hide_env_values = true, global = true)]
    pub age_public_key: Option<String>,

    /// Additional age recipients, comma separated
    #[arg(long, env = constants::ENV_AGE_PUBLIC_KEYS, hide_env_values = true, global = true)]
    pub public_age_keys: Option<String>,

    /// age identity for sops decryption
    #[arg(long, env = constants::ENV_AGE_PRIVATE_KEY, hide_env_values = true, global = true)]
    pub age_private_key: Option<String>,

    /// Fernet key for the symmetric backend
    #[arg(long, env = constants::ENV_SECRET_KEY, hide_env_values = true, global = true)]
    pub secret_key: Option<String>,
}

impl KeyArgs {
    pub fn material(&self) -> KeyMaterial {
        let recipients: Vec<&str> = [&self.age_public_key, &self.public_age_keys]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        KeyMaterial::new(
            Some(&recipients.join(",")),
            self.age_private_key.clone(),
            self.secret_key.clone(),
        )
    }
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Command {
    /// Report affected parameters and, when forced, rotate credentials
    Rotate {
        /// Rotation payload (JSON, optionally base64 encoded or encrypted)
        #[arg(long, env = constants::ENV_PAYLOAD, hide_env_values = true)]
        payload: Option<String>,

        /// Update credential files ("true" enables)
        #[arg(long, env = constants::ENV_FORCE, default_value = "false")]
        force: String,
    },

    /// Show classified files and shared credential resolution
    Scan {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt a credential file with the configured backend
    Decrypt {
        /// File to decrypt
        file: PathBuf,
        /// Print plaintext instead of rewriting the file
        #[arg(long)]
        stdout: bool,
    },

    /// Encrypt a credential file with the configured backend
    Encrypt {
        /// File to encrypt
        file: PathBuf,
        /// Prior ciphertext of the file; unchanged values keep their ciphertext
        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Print one decrypted attribute of a credential file
    Extract {
        /// Credential file
        file: PathBuf,
        /// Dotted attribute path (e.g. db-cred.data.password)
        attribute: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

/// Execute a command.
pub fn execute(cli: Cli) -> Result<()> {
    let Cli {
        scope,
        keys,
        command,
        ..
    } = cli;

    match command {
        Command::Rotate { payload, force } => {
            let payload = payload
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| ConfigError::Missing(constants::ENV_PAYLOAD.to_string()))?;
            rotate::execute(&scope, &keys, payload, &force)
        }
        Command::Scan { json } => scan::execute(&scope, &keys, json),
        Command::Decrypt { file, stdout } => crypt::decrypt(&scope, &keys, &file, stdout),
        Command::Encrypt { file, previous } => {
            crypt::encrypt(&scope, &keys, &file, previous.as_deref())
        }
        Command::Extract { file, attribute } => crypt::extract(&scope, &keys, &file, &attribute),
        Command::Completions { shell } => completions::execute(shell),
    }
}
