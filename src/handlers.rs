//! Built-in task handlers: `log` and `shell`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use tickwork_core::TaskRegistry;
use tickwork_protocols::{
    HandlerError, JobExecutionContext, JobExecutionResult, TaskHandler, TaskPayload,
};

/// Registry holding the built-in handlers.
pub(crate) fn builtin_registry() -> Arc<TaskRegistry> {
    let registry = Arc::new(TaskRegistry::new());
    registry.register("log", LogHandler);
    registry.register("shell", ShellHandler);
    registry
}

#[derive(Debug, Deserialize)]
struct LogParams {
    message: String,
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    "info".to_string()
}

/// Writes `data.message` to the log at `data.level`.
pub(crate) struct LogHandler;

#[async_trait]
impl TaskHandler for LogHandler {
    async fn handle(
        &self,
        payload: TaskPayload,
        ctx: JobExecutionContext,
    ) -> Result<JobExecutionResult, HandlerError> {
        let params: LogParams = serde_json::from_value(payload.data)?;
        let job_id = ctx.job_id.as_str();
        match params.level.as_str() {
            "debug" => debug!(job_id, "{}", params.message),
            "warn" => warn!(job_id, "{}", params.message),
            "error" => error!(job_id, "{}", params.message),
            _ => info!(job_id, "{}", params.message),
        }
        Ok(JobExecutionResult::success(Some(
            json!({ "message": params.message }),
        )))
    }
}

#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

/// Runs `data.command` through the platform shell.
///
/// A non-zero exit status is a failed attempt. The scheduler's execution
/// timeout applies.
pub(crate) struct ShellHandler;

#[async_trait]
impl TaskHandler for ShellHandler {
    async fn handle(
        &self,
        payload: TaskPayload,
        ctx: JobExecutionContext,
    ) -> Result<JobExecutionResult, HandlerError> {
        let params: ShellParams = serde_json::from_value(payload.data)?;

        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(&params.command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &params.cwd {
            cmd.current_dir(cwd);
        }

        debug!(job_id = %ctx.job_id, command = %params.command, "Running shell task");
        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(JobExecutionResult::success(Some(json!({
                "exit_code": 0,
                "stdout": stdout,
                "stderr": stderr,
            }))))
        } else {
            let code = output.status.code().unwrap_or(-1);
            let mut message = format!("Command failed with exit code {}", code);
            if !stderr.is_empty() {
                message.push('\n');
                message.push_str(stderr.trim_end());
            }
            Ok(JobExecutionResult::failure(message))
        }
    }
}
