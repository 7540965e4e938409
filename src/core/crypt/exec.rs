//! External process execution with a hard timeout.

use std::process::{Command, Output, Stdio};
use std::time::Duration;

use tokio::time::timeout;
use tracing::trace;

use crate::error::CryptError;

/// Run a command to completion, killing it if it outlives `limit`.
///
/// The caller inspects the exit status; only spawn failures and timeouts
/// are errors here. Each call drives its own current-thread runtime, so it
/// is safe to call from pool worker threads.
pub fn run_with_timeout(command: Command, limit: Duration) -> Result<Output, CryptError> {
    let command_line = describe(&command);
    let mut command = tokio::process::Command::from(command);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CryptError::CommandFailed {
            command: command_line.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;

    trace!(command = %command_line, timeout_secs = limit.as_secs(), "spawning");
    runtime.block_on(async {
        let child = command.spawn().map_err(|e| CryptError::CommandFailed {
            command: command_line.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                trace!(command = %command_line, status = %output.status, "finished");
                Ok(output)
            }
            Ok(Err(e)) => Err(CryptError::CommandFailed {
                command: command_line.clone(),
                status: "unknown".to_string(),
                stderr: e.to_string(),
            }),
            Err(_) => Err(CryptError::Timeout {
                command: command_line.clone(),
                secs: limit.as_secs(),
            }),
        }
    })
}

/// Program plus arguments, for messages. Environment is never included.
fn describe(command: &Command) -> String {
    let program = command.get_program().to_string_lossy().into_owned();
    let args = command
        .get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
