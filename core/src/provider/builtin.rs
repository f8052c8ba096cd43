//! In-process tool provider
//!
//! Executes tools declared with execution mode `builtin` through a fixed set
//! of named handlers. This is the in-process conversion path for tools that
//! would be silly to shell out for.

use super::{ToolExecutionResult, ToolInvocationContext, ToolProvider};
use crate::error::Result;
use crate::registry::{ToolAvailability, ToolConfig};
use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const HANDLERS: &[&str] = &["word_count", "file_info"];

/// Runs registry tools through in-process handlers
#[derive(Debug, Default)]
pub struct BuiltinToolProvider;

impl BuiltinToolProvider {
    pub fn new() -> Self {
        Self
    }

    async fn word_count(ctx: &ToolInvocationContext) -> std::io::Result<String> {
        let content = tokio::fs::read_to_string(&ctx.target_path).await?;
        let lines = content.lines().count();
        let words = content.split_whitespace().count();
        Ok(format!(
            "{}: {} lines, {} words, {} bytes",
            ctx.target_path.display(),
            lines,
            words,
            content.len()
        ))
    }

    async fn file_info(ctx: &ToolInvocationContext) -> std::io::Result<String> {
        let metadata = tokio::fs::metadata(&ctx.target_path).await?;
        let kind = if metadata.is_dir() { "directory" } else { "file" };
        let modified = metadata
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(format!(
            "{}: {} ({} bytes, modified {})",
            ctx.target_path.display(),
            kind,
            metadata.len(),
            modified
        ))
    }
}

#[async_trait]
impl ToolProvider for BuiltinToolProvider {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn can_handle(&self, config: &ToolConfig) -> bool {
        config.execution.mode == "builtin"
            && config
                .execution
                .handler
                .as_deref()
                .map(|h| HANDLERS.contains(&h))
                .unwrap_or(false)
    }

    async fn availability(&self, _config: &ToolConfig) -> Result<ToolAvailability> {
        // Handlers are compiled in; if we accepted the spec we can run it
        Ok(ToolAvailability::available())
    }

    async fn execute(
        &self,
        config: &ToolConfig,
        ctx: &ToolInvocationContext,
        _cancel: &CancellationToken,
    ) -> Result<ToolExecutionResult> {
        let start = Instant::now();
        let handler = config.execution.handler.as_deref().unwrap_or_default();

        let outcome = match handler {
            "word_count" => Self::word_count(ctx).await,
            "file_info" => Self::file_info(ctx).await,
            other => {
                return Ok(ToolExecutionResult::failure(
                    format!("unknown builtin handler '{}'", other),
                    start.elapsed(),
                ))
            }
        };

        match outcome {
            Ok(output) => Ok(ToolExecutionResult::success(output, start.elapsed())),
            Err(e) => Ok(ToolExecutionResult::failure(e.to_string(), start.elapsed())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn builtin_config(handler: &str) -> ToolConfig {
        serde_json::from_value(serde_json::json!({
            "name": "builtin-test",
            "execution": { "mode": "builtin", "handler": handler }
        }))
        .unwrap()
    }

    fn ctx_for(path: &std::path::Path) -> ToolInvocationContext {
        ToolInvocationContext {
            objective: "count it".to_string(),
            target_path: path.to_path_buf(),
            language: None,
            parameters: HashMap::new(),
        }
    }

    #[test]
    fn only_known_handlers_are_accepted() {
        let provider = BuiltinToolProvider::new();
        assert!(provider.can_handle(&builtin_config("word_count")));
        assert!(!provider.can_handle(&builtin_config("summon_demon")));
    }

    #[tokio::test]
    async fn word_count_reports_lines_and_words() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("sample.txt");
        tokio::fs::write(&file, "one two\nthree\n").await.unwrap();

        let provider = BuiltinToolProvider::new();
        let result = provider
            .execute(
                &builtin_config("word_count"),
                &ctx_for(&file),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("2 lines"));
        assert!(result.output.contains("3 words"));
    }

    #[tokio::test]
    async fn missing_target_is_a_structured_failure() {
        let provider = BuiltinToolProvider::new();
        let result = provider
            .execute(
                &builtin_config("file_info"),
                &ctx_for(std::path::Path::new("/nope/missing.txt")),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
