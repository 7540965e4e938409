//! credrot - Credential rotation for environment configuration repositories.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use credrot::cli::output;
use credrot::cli::{execute, Cli};
use credrot::core::constants::ENV_LOG;

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber with env-filter support
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("credrot=debug")
        } else {
            EnvFilter::new("credrot=info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    if let Err(e) = execute(cli) {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
