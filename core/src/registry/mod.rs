//! Tool registry
//!
//! Loads tool descriptors from a declarative JSON registry file, binds each
//! descriptor to the first capability provider that accepts it, and probes
//! availability. The exposed tool list is a copy-on-write snapshot: reload
//! rebuilds the whole list and swaps it atomically, so readers never block.

use crate::error::{ForemanError, Result};
use crate::provider::ToolProvider;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Current availability of a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAvailability {
    pub available: bool,
    pub detail: String,
}

impl ToolAvailability {
    pub fn available() -> Self {
        Self {
            available: true,
            detail: String::new(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            detail: detail.into(),
        }
    }
}

/// How a tool is executed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSpec {
    /// Execution mode: "command" (external process) or "builtin" (in-process)
    pub mode: String,
    /// External command to run (mode "command")
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments; `{target}` and `{objective}` placeholders are substituted
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Named in-process handler (mode "builtin")
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_forward() -> bool {
    true
}

/// One declared tool in the registry document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tie-break on equal scores; lower value wins, missing = lowest precedence
    #[serde(default)]
    pub priority: Option<u32>,
    pub execution: ExecutionSpec,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub intent_keywords: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
    /// When false the tool's output is the final answer and the agent is bypassed
    #[serde(default = "default_forward")]
    pub forward_result_to_agent: bool,
}

impl ToolConfig {
    /// Human-facing name, falling back to the registry name
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Tool kind, falling back to "external"
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("external")
    }
}

/// A registry entry bound to a provider with probed availability.
///
/// Rebuilt wholesale on every reload, never mutated in place.
pub struct ToolDescriptor {
    pub config: ToolConfig,
    pub provider: Option<Arc<dyn ToolProvider>>,
    pub availability: ToolAvailability,
}

impl ToolDescriptor {
    pub fn is_available(&self) -> bool {
        self.availability.available
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.config.name)
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .field("available", &self.availability.available)
            .finish()
    }
}

/// Snapshot type handed to readers
pub type ToolSnapshot = Arc<Vec<Arc<ToolDescriptor>>>;

/// Registry of declared tools bound to capability providers
pub struct ToolRegistry {
    path: PathBuf,
    providers: Vec<Arc<dyn ToolProvider>>,
    /// Serializes reloads; readers go through `snapshot` and never take this
    reload_lock: Mutex<()>,
    snapshot: RwLock<ToolSnapshot>,
}

impl ToolRegistry {
    /// Create a registry over a JSON registry file and a fixed provider set.
    ///
    /// The registry starts empty; call [`ToolRegistry::reload`] to populate.
    pub fn new(path: impl Into<PathBuf>, providers: Vec<Arc<dyn ToolProvider>>) -> Self {
        Self {
            path: path.into(),
            providers,
            reload_lock: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current tool snapshot; cheap, never blocks on a concurrent reload
    pub fn tools(&self) -> ToolSnapshot {
        self.snapshot.read().clone()
    }

    /// Re-read the registry file and rebuild all descriptors.
    ///
    /// A missing or malformed registry degrades to an empty tool set with a
    /// warning rather than failing the caller.
    pub async fn reload(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.reload_lock.lock();

        let configs = match self.read_registry_file() {
            Ok(configs) => configs,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "registry unreadable, degrading to empty tool set");
                *self.snapshot.write() = Arc::new(Vec::new());
                return Ok(());
            }
        };

        let mut descriptors = Vec::with_capacity(configs.len());
        for config in configs {
            if cancel.is_cancelled() {
                break;
            }
            descriptors.push(Arc::new(self.bind(config).await));
        }

        info!(
            tools = descriptors.len(),
            available = descriptors.iter().filter(|d| d.is_available()).count(),
            "tool registry reloaded"
        );
        *self.snapshot.write() = Arc::new(descriptors);
        Ok(())
    }

    fn read_registry_file(&self) -> Result<Vec<ToolConfig>> {
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ForemanError::configuration(format!("malformed registry: {}", e)))
    }

    /// Bind one declared tool to a provider and probe its availability
    async fn bind(&self, config: ToolConfig) -> ToolDescriptor {
        if !config.enabled {
            return ToolDescriptor {
                config,
                provider: None,
                availability: ToolAvailability::unavailable("disabled"),
            };
        }

        let Some(provider) = self
            .providers
            .iter()
            .find(|p| p.can_handle(&config))
            .cloned()
        else {
            return ToolDescriptor {
                config,
                provider: None,
                availability: ToolAvailability::unavailable("no provider"),
            };
        };

        // Provider failures downgrade to unavailable, they never poison a reload
        let availability = match provider.availability(&config).await {
            Ok(availability) => availability,
            Err(e) => ToolAvailability::unavailable(e.to_string()),
        };

        ToolDescriptor {
            config,
            provider: Some(provider),
            availability,
        }
    }
}
