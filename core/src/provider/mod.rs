//! Tool capability providers
//!
//! A provider knows how to execute one family of tool execution specs
//! (external commands, in-process handlers, ...). The registry binds each
//! declared tool to the first provider whose `can_handle` accepts it, once at
//! reload time; resolution never re-scans the provider set.

pub mod builtin;
pub mod process;

pub use builtin::BuiltinToolProvider;
pub use process::ProcessToolProvider;

use crate::error::Result;
use crate::registry::{ToolAvailability, ToolConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of one tool execution.
///
/// Constructed only through [`ToolExecutionResult::success`] and
/// [`ToolExecutionResult::failure`].
#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
}

impl ToolExecutionResult {
    pub fn success(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            duration,
        }
    }

    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration,
        }
    }

    /// Failure that still carries partial output (e.g. a linter's findings)
    pub fn failure_with_output(
        output: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            duration,
        }
    }
}

/// Read-only context handed to a provider for one invocation
#[derive(Debug, Clone)]
pub struct ToolInvocationContext {
    /// The user's objective for this turn
    pub objective: String,
    /// Absolute resolved target path (defaults to the working directory)
    pub target_path: PathBuf,
    /// Detected language, if any
    pub language: Option<String>,
    /// Parameters extracted by the intent classifier
    pub parameters: HashMap<String, String>,
}

/// Contract between the registry/orchestrator and a tool implementation
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Whether this provider can execute the given tool's execution spec
    fn can_handle(&self, config: &ToolConfig) -> bool;

    /// Probe whether the tool is currently runnable
    async fn availability(&self, config: &ToolConfig) -> Result<ToolAvailability>;

    /// Execute the tool. Implementations report tool failures through the
    /// result object; an `Err` is reserved for provider-level faults and is
    /// downgraded to a skip by the orchestrator.
    async fn execute(
        &self,
        config: &ToolConfig,
        ctx: &ToolInvocationContext,
        cancel: &CancellationToken,
    ) -> Result<ToolExecutionResult>;
}
