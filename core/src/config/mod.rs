//! Runtime configuration
//!
//! Loaded from a YAML file (default `~/.config/foreman/config.yaml`), with
//! every field optional so a missing or partial file still yields a usable
//! setup. The LLM API key can also come from the `FOREMAN_API_KEY`
//! environment variable, which wins over the file.

use crate::error::{ForemanError, Result};
use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const API_KEY_ENV: &str = "FOREMAN_API_KEY";

fn default_true() -> bool {
    true
}

fn default_max_output_chars() -> usize {
    4000
}

fn default_max_iterations() -> usize {
    8
}

fn default_token_budget() -> usize {
    12_000
}

fn default_tail_window() -> usize {
    10
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_registry_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("foreman")
        .join("tools.json")
}

/// Everything the runtime needs, in one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForemanConfig {
    /// Run matching registry tools before consulting the model
    #[serde(default = "default_true")]
    pub auto_execute_tools: bool,
    /// Tool output is truncated to this many characters
    #[serde(default = "default_max_output_chars")]
    pub max_tool_output_chars: usize,
    /// Hard cap on agent chat/tool rounds per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Sandbox root for the agent's filesystem tools
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Allow write_file/append_file inside the sandbox
    #[serde(default)]
    pub enable_writes: bool,
    /// Estimated-token ceiling before history compaction
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Messages kept verbatim when compacting
    #[serde(default = "default_tail_window")]
    pub tail_window: usize,
    /// Location of the tool registry document
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            auto_execute_tools: true,
            max_tool_output_chars: default_max_output_chars(),
            max_iterations: default_max_iterations(),
            workspace_root: default_workspace_root(),
            enable_writes: false,
            token_budget: default_token_budget(),
            tail_window: default_tail_window(),
            registry_path: default_registry_path(),
            llm: LlmConfig::default(),
        }
    }
}

impl ForemanConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("foreman")
            .join("config.yaml")
    }

    /// Load from a YAML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = match std::fs::read_to_string(path) {
            Ok(content) => serde_yml::from_str(&content).map_err(|e| {
                ForemanError::configuration(format!(
                    "cannot parse {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                config.llm.api_key = Some(key);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// The endpoint fields cannot be defaulted away to empty strings
    fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(ForemanError::MissingConfig {
                key: "llm.model".to_string(),
            });
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(ForemanError::MissingConfig {
                key: "llm.base_url".to_string(),
            });
        }
        Ok(())
    }

    /// Flattened key/value view, stored in session state for diagnostics
    pub fn snapshot(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();
        map.insert(
            "auto_execute_tools".to_string(),
            self.auto_execute_tools.to_string(),
        );
        map.insert(
            "max_iterations".to_string(),
            self.max_iterations.to_string(),
        );
        map.insert(
            "workspace_root".to_string(),
            self.workspace_root.display().to_string(),
        );
        map.insert("enable_writes".to_string(), self.enable_writes.to_string());
        map.insert("token_budget".to_string(), self.token_budget.to_string());
        map.insert("model".to_string(), self.llm.model.clone());
        map
    }
}
