//! One-shot command execution with captured output

use log::debug;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{AgentError, Result};

/// Run a command to completion and return its stdout as UTF-8 text.
///
/// A non-zero exit status or an expired time budget is a collection failure;
/// the child is killed on timeout rather than left running.
pub async fn run_command(program: &str, args: &[String], budget: Duration) -> Result<String> {
    debug!("Running command: {} {:?}", program, args);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AgentError::Collection(format!("Failed to spawn '{}': {}", program, e)))?;

    let output = match timeout(budget, child.wait_with_output()).await {
        Ok(output) => output
            .map_err(|e| AgentError::Collection(format!("Failed to run '{}': {}", program, e)))?,
        Err(_) => {
            return Err(AgentError::Timeout(format!(
                "Command '{}' exceeded its {:?} budget",
                program, budget
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::Collection(format!(
            "Command '{}' exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
