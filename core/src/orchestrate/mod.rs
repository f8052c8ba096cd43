//! Tool orchestration
//!
//! Decides whether a specialized registered tool should answer an objective
//! before the model is consulted. Resolution scores every available
//! descriptor against the classified request; execution either bypasses the
//! agent with the tool's raw output or forwards an enriched objective.

use crate::error::{ForemanError, Result};
use crate::intent::{IntentClassifier, ToolRequest};
use crate::provider::ToolInvocationContext;
use crate::registry::{ToolConfig, ToolDescriptor, ToolRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Score awarded for an exact task match
const SCORE_TASK: i64 = 6;
/// Score awarded for a language match
const SCORE_LANGUAGE: i64 = 3;
/// Score awarded for a file-extension match
const SCORE_EXTENSION: i64 = 2;
/// Bonus for conversion tools when the request names a file but no task
const SCORE_CONVERSION_BONUS: i64 = 2;

/// Result of one orchestration attempt
#[derive(Debug, Clone)]
pub enum OrchestrationOutcome {
    /// No tool ran (or its result was unusable); the objective goes to the
    /// agent unchanged. Carries the reason for logs and diagnostics.
    Skipped { reason: String },
    /// A tool ran and its output is the final user-visible answer
    Complete { tool: String, response: String },
    /// A tool ran and the agent should continue with an enriched objective
    Forward { tool: String, objective: String },
}

impl OrchestrationOutcome {
    /// Whether a tool actually executed
    pub fn tool_executed(&self) -> bool {
        !matches!(self, OrchestrationOutcome::Skipped { .. })
    }

    /// Whether the agent is bypassed entirely
    pub fn bypasses_agent(&self) -> bool {
        matches!(self, OrchestrationOutcome::Complete { .. })
    }
}

/// Scores, selects, and executes registry tools for classified requests
pub struct ToolOrchestrator {
    classifier: IntentClassifier,
    registry: Arc<ToolRegistry>,
    /// When false, `try_orchestrate` is a no-op skip
    auto_execute: bool,
    /// Tool output is trimmed and truncated to this many characters
    max_output_chars: usize,
}

impl ToolOrchestrator {
    pub fn new(registry: Arc<ToolRegistry>, auto_execute: bool, max_output_chars: usize) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            registry,
            auto_execute,
            max_output_chars,
        }
    }

    /// Score one descriptor against a request.
    ///
    /// The constants and their evaluation order decide which tool wins an
    /// ambiguous request; they are part of the product behavior. Do not
    /// rebalance them casually.
    pub fn score(config: &ToolConfig, request: &ToolRequest) -> i64 {
        let mut score = 0;

        if let Some(task) = &request.task {
            if config.tasks.iter().any(|t| t.eq_ignore_ascii_case(task)) {
                score += SCORE_TASK;
            }
        }

        if let Some(language) = &request.language {
            if config
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(language))
            {
                score += SCORE_LANGUAGE;
            }
        }

        if let Some(extension) = &request.extension {
            if config
                .file_extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(extension))
            {
                score += SCORE_EXTENSION;
            }
        }

        score += config
            .intent_keywords
            .iter()
            .filter(|k| request.keywords.contains(&k.to_lowercase()))
            .count() as i64;

        // Conversion tools get a nudge for "do something with file X" requests
        // that classified to no task at all
        if request.task.is_none()
            && request.extension.is_some()
            && config.tasks.iter().any(|t| t.eq_ignore_ascii_case("conversion"))
        {
            score += SCORE_CONVERSION_BONUS;
        }

        score
    }

    /// Pick the best tool for a request.
    ///
    /// Only descriptors with score > 0 and availability are candidates. Ties
    /// fall to the lower configured priority value; a missing priority sorts
    /// last.
    pub fn resolve(&self, request: &ToolRequest) -> Option<(Arc<ToolDescriptor>, i64)> {
        let mut best: Option<(Arc<ToolDescriptor>, i64, u32)> = None;

        for descriptor in self.registry.tools().iter() {
            if !descriptor.is_available() {
                continue;
            }
            let score = Self::score(&descriptor.config, request);
            if score <= 0 {
                continue;
            }
            let priority = descriptor.config.priority.unwrap_or(u32::MAX);
            let wins = match &best {
                None => true,
                Some((_, best_score, best_priority)) => {
                    score > *best_score || (score == *best_score && priority < *best_priority)
                }
            };
            if wins {
                best = Some((descriptor.clone(), score, priority));
            }
        }

        best.map(|(descriptor, score, _)| (descriptor, score))
    }

    /// Attempt to answer the objective with a specialized tool.
    ///
    /// Every failure path short of invalid input is converted into a
    /// [`OrchestrationOutcome::Skipped`]; nothing here aborts the turn.
    pub async fn try_orchestrate(
        &self,
        objective: &str,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationOutcome> {
        if !self.auto_execute {
            return Ok(skip("automatic tool execution is disabled"));
        }

        let request = self.classifier.classify(objective)?;
        debug!(task = ?request.task, language = ?request.language, extension = ?request.extension, "classified objective");

        let Some((descriptor, score)) = self.resolve(&request) else {
            return Ok(skip("no registered tool matches this request"));
        };
        let Some(provider) = descriptor.provider.clone() else {
            return Ok(skip(format!(
                "tool '{}' has no bound provider",
                descriptor.config.name
            )));
        };

        info!(tool = %descriptor.config.name, score, "executing resolved tool");

        let context = self.build_context(&request);
        let result = match provider.execute(&descriptor.config, &context, cancel).await {
            Ok(result) => result,
            Err(e) => {
                // Provider faults never propagate past orchestration
                let error = ForemanError::ToolExecution {
                    tool_name: descriptor.config.name.clone(),
                    message: e.to_string(),
                };
                return Ok(skip(error.to_string()));
            }
        };

        let output = normalize_output(&result.output, self.max_output_chars);

        if !result.success {
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| format!("tool '{}' reported failure", descriptor.config.name));
            return Ok(skip(reason));
        }

        if !descriptor.config.forward_result_to_agent {
            return Ok(OrchestrationOutcome::Complete {
                tool: descriptor.config.name.clone(),
                response: output,
            });
        }

        Ok(OrchestrationOutcome::Forward {
            tool: descriptor.config.name.clone(),
            objective: forward_prompt(&request.objective, &descriptor.config, &output, result.error.as_deref()),
        })
    }

    fn build_context(&self, request: &ToolRequest) -> ToolInvocationContext {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let target_path = match &request.target_path {
            Some(target) => {
                let path = PathBuf::from(target);
                if path.is_absolute() {
                    path
                } else {
                    cwd.join(path)
                }
            }
            None => cwd,
        };

        ToolInvocationContext {
            objective: request.objective.clone(),
            target_path,
            language: request.language.clone(),
            parameters: request.parameters.clone(),
        }
    }
}

fn skip(reason: impl Into<String>) -> OrchestrationOutcome {
    let reason = reason.into();
    debug!(%reason, "orchestration skipped");
    OrchestrationOutcome::Skipped { reason }
}

/// Trim and cap tool output before it reaches the user or the model
fn normalize_output(raw: &str, max_chars: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut capped: String = trimmed.chars().take(max_chars).collect();
    capped.push_str("\n... (output truncated)");
    capped
}

/// Structured prompt handed to the agent when a tool ran first
fn forward_prompt(objective: &str, config: &ToolConfig, output: &str, error: Option<&str>) -> String {
    let output_block = if output.is_empty() { "(no output)" } else { output };
    let mut prompt = format!(
        "The user asked: {}\n\n\
        The '{}' tool ({}) already ran against this request and produced:\n\n\
        {}\n",
        objective,
        config.display_name(),
        config.kind(),
        output_block
    );
    if let Some(error) = error {
        if !error.trim().is_empty() {
            prompt.push_str(&format!("\nTool error log:\n{}\n", error.trim()));
        }
    }
    prompt.push_str("\nUsing the tool output above, provide actionable recommendations that address the user's request.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForemanError;
    use crate::provider::{ToolExecutionResult, ToolProvider};
    use crate::registry::ToolAvailability;
    use async_trait::async_trait;
    use std::io::Write;
    use std::time::Duration;

    /// Provider that answers every command-mode tool with a fixed output
    struct FixedOutputProvider {
        output: &'static str,
    }

    #[async_trait]
    impl ToolProvider for FixedOutputProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn can_handle(&self, config: &ToolConfig) -> bool {
            config.execution.mode == "command"
        }

        async fn availability(&self, _config: &ToolConfig) -> Result<ToolAvailability> {
            Ok(ToolAvailability::available())
        }

        async fn execute(
            &self,
            _config: &ToolConfig,
            _ctx: &ToolInvocationContext,
            _cancel: &CancellationToken,
        ) -> Result<ToolExecutionResult> {
            Ok(ToolExecutionResult::success(
                self.output,
                Duration::from_millis(5),
            ))
        }
    }

    struct FaultyProvider;

    #[async_trait]
    impl ToolProvider for FaultyProvider {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn can_handle(&self, config: &ToolConfig) -> bool {
            config.execution.mode == "command"
        }

        async fn availability(&self, _config: &ToolConfig) -> Result<ToolAvailability> {
            Ok(ToolAvailability::available())
        }

        async fn execute(
            &self,
            _config: &ToolConfig,
            _ctx: &ToolInvocationContext,
            _cancel: &CancellationToken,
        ) -> Result<ToolExecutionResult> {
            Err(ForemanError::provider("exploded mid-flight"))
        }
    }

    fn config_from(json: serde_json::Value) -> ToolConfig {
        serde_json::from_value(json).unwrap()
    }

    fn request_for(objective: &str) -> ToolRequest {
        IntentClassifier::new().classify(objective).unwrap()
    }

    async fn registry_from(
        json: &str,
        provider: Arc<dyn ToolProvider>,
    ) -> (Arc<ToolRegistry>, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let registry = Arc::new(ToolRegistry::new(file.path(), vec![provider]));
        registry.reload(&CancellationToken::new()).await.unwrap();
        (registry, file)
    }

    #[test]
    fn task_language_extension_contributions_are_exact() {
        let config = config_from(serde_json::json!({
            "name": "linter",
            "execution": { "mode": "command", "command": "lint" },
            "tasks": ["lint"],
            "languages": ["yaml"],
            "file_extensions": [".yaml"]
        }));

        let request = request_for("lint my config.yaml file");
        // task +6, language +3, extension +2
        assert_eq!(ToolOrchestrator::score(&config, &request), 11);

        let task_only = config_from(serde_json::json!({
            "name": "t",
            "execution": { "mode": "command", "command": "lint" },
            "tasks": ["lint"]
        }));
        assert_eq!(ToolOrchestrator::score(&task_only, &request), 6);
    }

    #[test]
    fn intent_keywords_add_one_each() {
        let config = config_from(serde_json::json!({
            "name": "k",
            "execution": { "mode": "command", "command": "x" },
            "intent_keywords": ["config", "file", "absent"]
        }));
        let request = request_for("lint my config.yaml file");
        assert_eq!(ToolOrchestrator::score(&config, &request), 2);
    }

    #[test]
    fn conversion_bonus_requires_no_task_and_an_extension() {
        let config = config_from(serde_json::json!({
            "name": "converter",
            "execution": { "mode": "command", "command": "conv" },
            "tasks": ["conversion"],
            "file_extensions": ["csv"]
        }));

        // No task signal, extension present: +2 extension, +2 bonus
        let request = request_for("do something with data.csv");
        assert_eq!(ToolOrchestrator::score(&config, &request), 4);

        // Task present: bonus withheld, but the task matches for +6
        let request = request_for("convert data.csv");
        assert_eq!(ToolOrchestrator::score(&config, &request), 8);
    }

    #[tokio::test]
    async fn resolve_skips_unavailable_and_zero_score_tools() {
        let json = r#"[
            {
                "name": "disabled-linter",
                "enabled": false,
                "execution": { "mode": "command", "command": "lint" },
                "tasks": ["lint"]
            },
            {
                "name": "unrelated",
                "execution": { "mode": "command", "command": "fmt" },
                "tasks": ["format"]
            }
        ]"#;
        let (registry, _file) =
            registry_from(json, Arc::new(FixedOutputProvider { output: "x" })).await;
        let orchestrator = ToolOrchestrator::new(registry, true, 4000);

        assert!(orchestrator.resolve(&request_for("lint my config.yaml file")).is_none());
    }

    #[tokio::test]
    async fn equal_scores_fall_to_lower_priority_value() {
        let json = r#"[
            {
                "name": "second-choice",
                "priority": 5,
                "execution": { "mode": "command", "command": "lint" },
                "tasks": ["lint"], "languages": ["yaml"], "file_extensions": ["yaml"],
                "intent_keywords": ["deploy"]
            },
            {
                "name": "first-choice",
                "priority": 1,
                "execution": { "mode": "command", "command": "lint" },
                "tasks": ["lint"], "languages": ["yaml"], "file_extensions": ["yaml"],
                "intent_keywords": ["deploy"]
            }
        ]"#;
        let (registry, _file) =
            registry_from(json, Arc::new(FixedOutputProvider { output: "x" })).await;
        let orchestrator = ToolOrchestrator::new(registry, true, 4000);

        let (descriptor, score) = orchestrator
            .resolve(&request_for("lint my config.yaml file"))
            .unwrap();
        assert_eq!(score, 11);
        assert_eq!(descriptor.config.name, "first-choice");
    }

    #[tokio::test]
    async fn missing_priority_sorts_last_on_ties() {
        let json = r#"[
            {
                "name": "no-priority",
                "execution": { "mode": "command", "command": "lint" },
                "tasks": ["lint"]
            },
            {
                "name": "prioritized",
                "priority": 9,
                "execution": { "mode": "command", "command": "lint" },
                "tasks": ["lint"]
            }
        ]"#;
        let (registry, _file) =
            registry_from(json, Arc::new(FixedOutputProvider { output: "x" })).await;
        let orchestrator = ToolOrchestrator::new(registry, true, 4000);

        let (descriptor, _) = orchestrator
            .resolve(&request_for("lint everything"))
            .unwrap();
        assert_eq!(descriptor.config.name, "prioritized");
    }

    #[tokio::test]
    async fn lint_tool_bypasses_agent_with_raw_output() {
        let json = r#"[
            {
                "name": "yaml-lint",
                "execution": { "mode": "command", "command": "yamllint" },
                "tasks": ["lint"],
                "file_extensions": ["yaml"],
                "forward_result_to_agent": false
            }
        ]"#;
        let (registry, _file) = registry_from(
            json,
            Arc::new(FixedOutputProvider {
                output: "  config.yaml: all clear  ",
            }),
        )
        .await;
        let orchestrator = ToolOrchestrator::new(registry, true, 4000);

        let outcome = orchestrator
            .try_orchestrate("lint my config.yaml file", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.tool_executed());
        assert!(outcome.bypasses_agent());
        match outcome {
            OrchestrationOutcome::Complete { tool, response } => {
                assert_eq!(tool, "yaml-lint");
                assert_eq!(response, "config.yaml: all clear");
            }
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn forwarding_tool_embeds_output_in_new_objective() {
        let json = r#"[
            {
                "name": "yaml-lint",
                "display_name": "YAML Linter",
                "type": "linter",
                "execution": { "mode": "command", "command": "yamllint" },
                "tasks": ["lint"],
                "file_extensions": ["yaml"]
            }
        ]"#;
        let (registry, _file) = registry_from(
            json,
            Arc::new(FixedOutputProvider {
                output: "line 3: trailing spaces",
            }),
        )
        .await;
        let orchestrator = ToolOrchestrator::new(registry, true, 4000);

        let outcome = orchestrator
            .try_orchestrate("lint my config.yaml file", &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            OrchestrationOutcome::Forward { tool, objective } => {
                assert_eq!(tool, "yaml-lint");
                assert!(objective.contains("lint my config.yaml file"));
                assert!(objective.contains("YAML Linter"));
                assert!(objective.contains("linter"));
                assert!(objective.contains("line 3: trailing spaces"));
                assert!(objective.contains("actionable recommendations"));
            }
            other => panic!("expected Forward, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn provider_fault_becomes_a_skip() {
        let json = r#"[
            {
                "name": "flaky",
                "execution": { "mode": "command", "command": "boom" },
                "tasks": ["lint"]
            }
        ]"#;
        let (registry, _file) = registry_from(json, Arc::new(FaultyProvider)).await;
        let orchestrator = ToolOrchestrator::new(registry, true, 4000);

        let outcome = orchestrator
            .try_orchestrate("lint it all", &CancellationToken::new())
            .await
            .unwrap();
        match outcome {
            OrchestrationOutcome::Skipped { reason } => {
                assert!(reason.contains("exploded mid-flight"));
            }
            other => panic!("expected Skipped, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn auto_execution_disabled_short_circuits() {
        let (registry, _file) = registry_from(
            r#"[]"#,
            Arc::new(FixedOutputProvider { output: "x" }),
        )
        .await;
        let orchestrator = ToolOrchestrator::new(registry, false, 4000);

        let outcome = orchestrator
            .try_orchestrate("lint my config.yaml file", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.tool_executed());
    }

    #[test]
    fn long_output_is_truncated_with_a_marker() {
        let raw = "x".repeat(50);
        let capped = normalize_output(&raw, 10);
        assert!(capped.starts_with("xxxxxxxxxx"));
        assert!(capped.ends_with("(output truncated)"));
    }
}
