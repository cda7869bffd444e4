use crate::{CoverageError, Result};
use async_trait::async_trait;
use log::{error, info};
use std::path::Path;

/// Runs a coverage-generating shell command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns captured stdout, or [`CoverageError::Command`] with captured stderr.
    async fn run(&self, command: &str, cwd: &Path) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellCommandRunner;

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str, cwd: &Path) -> Result<String> {
        info!("Running {command} ...");
        let output = shell(command).current_dir(cwd).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                "Error running coverage command ({}): {stderr}",
                output.status
            );
            return Err(CoverageError::Command {
                command: command.to_string(),
                stderr,
            });
        }
        info!("Successfully generated coverage");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(not(windows))]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
