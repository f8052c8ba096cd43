//! Bounded tool-using agent loop
//!
//! Runs the model against the conversation until it answers in plain text,
//! executing any filesystem tool calls it emits along the way. The loop is
//! hard-capped on iterations so a model stuck calling tools cannot spin
//! forever.

pub mod fs_tools;

pub use fs_tools::{FileSystemToolDispatcher, ToolOutput};

use crate::error::Result;
use crate::llm::{ChatMessage, ChatProvider, ChatRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One tool call the agent executed during a run
#[derive(Debug, Clone)]
pub struct AgentToolInvocation {
    pub tool: String,
    pub arguments: String,
    pub output: String,
    pub is_error: bool,
}

/// Final state of one agent run
#[derive(Debug, Clone)]
pub struct AgentExecutionResult {
    /// The model's last text answer, possibly empty if the run was cut off
    pub response: String,
    /// Every tool call made, in execution order
    pub invocations: Vec<AgentToolInvocation>,
    /// False when the iteration cap or cancellation stopped the run early
    pub completed: bool,
}

/// Drives chat/tool rounds until the model produces a plain answer
pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    dispatcher: Arc<FileSystemToolDispatcher>,
    max_iterations: usize,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        dispatcher: Arc<FileSystemToolDispatcher>,
        max_iterations: usize,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            // A zero cap would make every run a silent no-op
            max_iterations: max_iterations.max(1),
        }
    }

    /// Run the loop over the given history. The history is extended in
    /// place with assistant and tool messages so the caller keeps the full
    /// transcript.
    pub async fn run(
        &self,
        messages: &mut Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<AgentExecutionResult> {
        let tools = self.dispatcher.tool_definitions();
        let mut invocations = Vec::new();
        let mut last_content = String::new();

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                info!(iteration, "agent run cancelled");
                return Ok(AgentExecutionResult {
                    response: last_content,
                    invocations,
                    completed: false,
                });
            }

            let request = ChatRequest::new(self.provider.model(), messages.clone())
                .with_tools(tools.clone());
            // Provider faults end the run; the caller decides what the user
            // sees
            let response = self.provider.chat(&request).await?;

            let Some(message) = response.message() else {
                warn!(iteration, "model returned no choices");
                return Err(crate::error::ForemanError::provider(
                    "model returned no choices",
                ));
            };
            let content = message.content.clone();

            let Some(tool_calls) = message.tool_calls.clone().filter(|c| !c.is_empty()) else {
                // Only a non-empty plain answer ends the run; an empty
                // response burns the iteration and we ask again
                if content.trim().is_empty() {
                    debug!(iteration, "model returned neither content nor tool calls");
                    continue;
                }
                debug!(iteration, "model answered without tool calls");
                return Ok(AgentExecutionResult {
                    response: content,
                    invocations,
                    completed: true,
                });
            };

            last_content = content.clone();
            messages.push(ChatMessage::assistant_with_tools(
                content,
                tool_calls.clone(),
            ));

            for call in tool_calls {
                if cancel.is_cancelled() {
                    break;
                }
                let output = self
                    .dispatcher
                    .dispatch(&call.function.name, &call.function.arguments)
                    .await;
                debug!(tool = %call.function.name, is_error = output.is_error, "tool call finished");
                messages.push(ChatMessage::tool_result(&call.id, &output.content));
                invocations.push(AgentToolInvocation {
                    tool: call.function.name,
                    arguments: call.function.arguments,
                    output: output.content,
                    is_error: output.is_error,
                });
            }
        }

        info!(
            max_iterations = self.max_iterations,
            "agent run stopped at the iteration cap"
        );
        Ok(AgentExecutionResult {
            response: crate::error::ForemanError::IterationLimit {
                max_iterations: self.max_iterations,
            }
            .user_message(),
            invocations,
            completed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        ChatResponse, ChatStream, Choice, MessageRole, ToolCall,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Provider that keeps asking for a directory listing forever
    struct AlwaysCallsTools {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for AlwaysCallsTools {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(response_with(
                None,
                Some(vec![ToolCall::function("call_1", "list_directory", "{}")]),
            ))
        }

        async fn chat_stream(&self, _request: &ChatRequest) -> Result<ChatStream> {
            unimplemented!("not used in these tests")
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    /// Provider that reads a file once, then answers with its contents
    struct ReadsThenAnswers {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for ReadsThenAnswers {
        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
            let round = self.calls.fetch_add(1, Ordering::SeqCst);
            if round == 0 {
                return Ok(response_with(
                    None,
                    Some(vec![ToolCall::function(
                        "call_1",
                        "read_file",
                        r#"{"path": "greeting.txt"}"#,
                    )]),
                ));
            }
            let tool_output = request
                .messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, MessageRole::Tool))
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(response_with(
                Some(format!("the file says: {}", tool_output)),
                None,
            ))
        }

        async fn chat_stream(&self, _request: &ChatRequest) -> Result<ChatStream> {
            unimplemented!("not used in these tests")
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn response_with(content: Option<String>, tool_calls: Option<Vec<ToolCall>>) -> ChatResponse {
        ChatResponse {
            id: "resp".to_string(),
            model: "test-model".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: MessageRole::Assistant,
                    content: content.unwrap_or_default(),
                    name: None,
                    tool_call_id: None,
                    tool_calls,
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    #[tokio::test]
    async fn iteration_cap_stops_a_tool_hungry_model() {
        let temp = TempDir::new().unwrap();
        let dispatcher = Arc::new(FileSystemToolDispatcher::new(temp.path(), false).unwrap());
        let provider = Arc::new(AlwaysCallsTools {
            calls: AtomicUsize::new(0),
        });
        let agent = AgentLoop::new(provider.clone(), dispatcher, 3);

        let mut messages = vec![ChatMessage::user("list everything forever")];
        let result = agent
            .run(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.completed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.invocations.len(), 3);
        assert!(result.response.contains("maximum iterations"));
    }

    #[tokio::test]
    async fn tool_output_reaches_the_final_answer() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("greeting.txt"), "hello")
            .await
            .unwrap();
        let dispatcher = Arc::new(FileSystemToolDispatcher::new(temp.path(), false).unwrap());
        let agent = AgentLoop::new(
            Arc::new(ReadsThenAnswers {
                calls: AtomicUsize::new(0),
            }),
            dispatcher,
            5,
        );

        let mut messages = vec![ChatMessage::user("what does greeting.txt say?")];
        let result = agent
            .run(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.completed);
        assert!(result.response.contains("hello"));
        assert_eq!(result.invocations.len(), 1);
        assert!(!result.invocations[0].is_error);
        // The transcript carries both the assistant tool round and the tool
        // reply
        assert!(messages.iter().any(|m| m.has_tool_calls()));
        assert!(messages
            .iter()
            .any(|m| matches!(m.role, MessageRole::Tool)));
    }

    /// Provider that returns neither content nor tool calls
    struct SaysNothing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for SaysNothing {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(response_with(None, None))
        }

        async fn chat_stream(&self, _request: &ChatRequest) -> Result<ChatStream> {
            unimplemented!("not used in these tests")
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    #[tokio::test]
    async fn empty_answer_without_tool_calls_does_not_complete() {
        let temp = TempDir::new().unwrap();
        let dispatcher = Arc::new(FileSystemToolDispatcher::new(temp.path(), false).unwrap());
        let provider = Arc::new(SaysNothing {
            calls: AtomicUsize::new(0),
        });
        let agent = AgentLoop::new(provider.clone(), dispatcher, 2);

        let mut messages = vec![ChatMessage::user("anything")];
        let result = agent
            .run(&mut messages, &CancellationToken::new())
            .await
            .unwrap();

        // Every iteration was spent re-asking, then the cap kicked in
        assert!(!result.completed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(result.invocations.is_empty());
        assert!(result.response.contains("maximum iterations"));
    }

    #[tokio::test]
    async fn pre_cancelled_token_runs_nothing() {
        let temp = TempDir::new().unwrap();
        let dispatcher = Arc::new(FileSystemToolDispatcher::new(temp.path(), false).unwrap());
        let provider = Arc::new(AlwaysCallsTools {
            calls: AtomicUsize::new(0),
        });
        let agent = AgentLoop::new(provider.clone(), dispatcher, 3);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut messages = vec![ChatMessage::user("anything")];
        let result = agent.run(&mut messages, &cancel).await.unwrap();

        assert!(!result.completed);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_iteration_cap_is_raised_to_one() {
        let temp = TempDir::new().unwrap();
        let dispatcher = Arc::new(FileSystemToolDispatcher::new(temp.path(), false).unwrap());
        let provider = Arc::new(AlwaysCallsTools {
            calls: AtomicUsize::new(0),
        });
        let agent = AgentLoop::new(provider.clone(), dispatcher, 0);

        let mut messages = vec![ChatMessage::user("anything")];
        agent
            .run(&mut messages, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
