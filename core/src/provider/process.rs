//! External process tool provider
//!
//! Executes tools declared with execution mode `command` by spawning the
//! configured binary. Availability is probed with a PATH lookup. Cancellation
//! terminates the child process.

use super::{ToolExecutionResult, ToolInvocationContext, ToolProvider};
use crate::error::{ForemanError, Result};
use crate::registry::{ToolAvailability, ToolConfig};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs registry tools as external processes
#[derive(Debug, Default)]
pub struct ProcessToolProvider;

impl ProcessToolProvider {
    pub fn new() -> Self {
        Self
    }

    /// Substitute `{target}` / `{objective}` placeholders in one argument
    fn substitute(arg: &str, ctx: &ToolInvocationContext) -> String {
        arg.replace("{target}", &ctx.target_path.to_string_lossy())
            .replace("{objective}", &ctx.objective)
    }

    /// The configured command may be a full command line, e.g.
    /// `"ruff check"`. Split it shell-style into program and leading args.
    fn split_command(command: &str) -> Result<(String, Vec<String>)> {
        let mut words = shell_words::split(command)
            .map_err(|e| ForemanError::configuration(format!("bad command '{}': {}", command, e)))?;
        if words.is_empty() {
            return Err(ForemanError::configuration("command tool without a command"));
        }
        let program = words.remove(0);
        Ok((program, words))
    }
}

#[async_trait]
impl ToolProvider for ProcessToolProvider {
    fn name(&self) -> &'static str {
        "process"
    }

    fn can_handle(&self, config: &ToolConfig) -> bool {
        config.execution.mode == "command"
            && config
                .execution
                .command
                .as_deref()
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false)
    }

    async fn availability(&self, config: &ToolConfig) -> Result<ToolAvailability> {
        let command = config
            .execution
            .command
            .as_deref()
            .ok_or_else(|| ForemanError::configuration("command tool without a command"))?;
        let (program, _) = Self::split_command(command)?;

        // A bare name is resolved on PATH; explicit paths are checked directly
        let found = if program.contains(std::path::MAIN_SEPARATOR) {
            std::path::Path::new(&program).is_file()
        } else {
            which::which(&program).is_ok()
        };

        if found {
            Ok(ToolAvailability::available())
        } else {
            Ok(ToolAvailability::unavailable(format!(
                "command '{}' not found on PATH",
                program
            )))
        }
    }

    async fn execute(
        &self,
        config: &ToolConfig,
        ctx: &ToolInvocationContext,
        cancel: &CancellationToken,
    ) -> Result<ToolExecutionResult> {
        let spec = &config.execution;
        let command = spec
            .command
            .as_deref()
            .ok_or_else(|| ForemanError::configuration("command tool without a command"))?;
        let (program, mut args) = Self::split_command(command)?;

        if spec.arguments.is_empty() {
            args.push(ctx.target_path.to_string_lossy().into_owned());
        } else {
            args.extend(spec.arguments.iter().map(|a| Self::substitute(a, ctx)));
        }

        debug!(tool = %config.name, command = %program, ?args, "spawning tool process");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.environment {
            cmd.env(key, value);
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| ForemanError::provider(format!("failed to spawn '{}': {}", command, e)))?;

        let output = tokio::select! {
            result = child.wait_with_output() => result
                .map_err(|e| ForemanError::provider(format!("failed to collect output: {}", e)))?,
            _ = cancel.cancelled() => {
                // Cancellation terminates the child rather than orphaning it
                warn!(tool = %config.name, "cancelled, killing tool process");
                return Ok(ToolExecutionResult::failure("cancelled", start.elapsed()));
            }
        };
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(ToolExecutionResult::success(stdout, duration))
        } else {
            let error = if stderr.trim().is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            Ok(ToolExecutionResult::failure_with_output(stdout, error, duration))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn command_config(command: &str, arguments: Vec<&str>) -> ToolConfig {
        serde_json::from_value(serde_json::json!({
            "name": "test-tool",
            "execution": {
                "mode": "command",
                "command": command,
                "arguments": arguments,
            }
        }))
        .unwrap()
    }

    fn ctx(target: &str) -> ToolInvocationContext {
        ToolInvocationContext {
            objective: "run the thing".to_string(),
            target_path: PathBuf::from(target),
            language: None,
            parameters: HashMap::new(),
        }
    }

    #[test]
    fn handles_only_command_mode_with_a_command() {
        let provider = ProcessToolProvider::new();
        assert!(provider.can_handle(&command_config("echo", vec![])));

        let builtin: ToolConfig = serde_json::from_value(serde_json::json!({
            "name": "b",
            "execution": { "mode": "builtin", "handler": "word_count" }
        }))
        .unwrap();
        assert!(!provider.can_handle(&builtin));

        let empty = command_config("  ", vec![]);
        assert!(!provider.can_handle(&empty));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let provider = ProcessToolProvider::new();
        let config = command_config("definitely-not-a-real-binary-xyz", vec![]);
        let availability = provider.availability(&config).await.unwrap();
        assert!(!availability.available);
        assert!(availability.detail.contains("not found"));
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let provider = ProcessToolProvider::new();
        let config = command_config("echo", vec!["{objective}"]);
        let result = provider
            .execute(&config, &ctx("/tmp"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.trim(), "run the thing");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_failure_with_stderr() {
        let provider = ProcessToolProvider::new();
        let config = command_config("sh", vec!["-c", "echo findings; echo broken >&2; exit 1"]);
        let result = provider
            .execute(&config, &ctx("/tmp"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output.trim(), "findings");
        assert_eq!(result.error.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn command_line_with_embedded_arguments_is_split() {
        let provider = ProcessToolProvider::new();
        let config = command_config("echo -n", vec!["{objective}"]);
        let result = provider
            .execute(&config, &ctx("/tmp"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "run the thing");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_child() {
        let provider = ProcessToolProvider::new();
        let config = command_config("sleep", vec!["30"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = provider
            .execute(&config, &ctx("/tmp"), &cancel)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
    }
}
