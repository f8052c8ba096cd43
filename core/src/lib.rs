pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod intent;
pub mod llm;
pub mod orchestrate;
pub mod provider;
pub mod registry;
pub mod session;

// Re-exports for convenience
pub use agent::{AgentExecutionResult, AgentLoop, FileSystemToolDispatcher};
pub use chat::{ChatCoordinator, HistoryCompactor, TurnOutcome};
pub use config::ForemanConfig;
pub use error::{ForemanError, Result};
pub use intent::{IntentClassifier, ToolRequest};
pub use llm::{ChatProvider, LlmClient, LlmConfig};
pub use orchestrate::{OrchestrationOutcome, ToolOrchestrator};
pub use registry::{ToolDescriptor, ToolRegistry};
pub use session::{ConversationSession, SessionStore};
