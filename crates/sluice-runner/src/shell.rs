//! Shell-based step execution on the host.

use async_trait::async_trait;
use sluice_core::definition::StepSpec;
use sluice_core::ports::{ExecutionContext, StepExecutor, StepOutcome};
use sluice_core::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Executor for `uses: run` steps: spawns `sh -c <command>` in the
/// instance working directory and relays output through the log.
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn run_command(&self, command: &str, ctx: &ExecutionContext, step_env: &HashMap<String, String>) -> Result<StepOutcome> {
        let start = std::time::Instant::now();

        info!(command = %command, working_dir = %ctx.working_dir.display(), "executing shell command");

        let mut env_vars: HashMap<String, String> = std::env::vars().collect();
        env_vars.extend(ctx.env.clone());
        env_vars.extend(step_env.clone());
        for (key, value) in &ctx.matrix {
            env_vars.insert(format!("MATRIX_{}", key.to_uppercase()), value.clone());
        }
        if let Some(image) = &ctx.image {
            env_vars.insert("SLUICE_IMAGE".to_string(), image.clone());
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.working_dir)
            .envs(&env_vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::StepExecution(format!("failed to spawn process: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(stream = "stdout", "{}", line);
                }
            }
        });
        let stderr_handle = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(stream = "stderr", "{}", line);
                }
            }
        });

        let status = child
            .wait()
            .await
            .map_err(|e| Error::StepExecution(format!("failed to wait for process: {}", e)))?;
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(exit_code, duration_ms, "command completed");

        Ok(StepOutcome {
            success: exit_code == 0,
            exit_code,
            duration_ms,
        })
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, step: &StepSpec, ctx: &ExecutionContext) -> Result<StepOutcome> {
        if step.uses != "run" {
            return Err(Error::UnknownExecutor(step.uses.clone()));
        }
        let command = step
            .with
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::StepExecution(format!("step '{}' has no command", step.name))
            })?;

        self.run_command(command, ctx, &step.env).await
    }
}
