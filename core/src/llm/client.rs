//! LLM Client implementation
//!
//! Talks to OpenAI-compatible chat completion APIs (OpenAI, Ollama, LM Studio,
//! local models). Non-streaming requests return the parsed response; streaming
//! requests are delivered as an ordered push sequence of [`StreamEvent`]s.

use super::{
    chat::{ChatRequest, ChatResponse, StreamEvent, ToolCall, Usage},
    ChatProvider, ChatStream, LlmConfig,
};
use crate::error::{ForemanError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client as HttpClient, StatusCode,
};
use serde::Deserialize;
use tracing::debug;

/// Main LLM Client
pub struct LlmClient {
    config: LlmConfig,
    http_client: HttpClient,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(300))
            .user_agent("foreman/0.3")
            .build()
            .map_err(|e| ForemanError::provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(LlmClient {
            config,
            http_client,
        })
    }

    /// Access the client configuration
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Apply configured sampling defaults to a request that does not override them
    fn apply_defaults(&self, request: &ChatRequest) -> ChatRequest {
        let mut request = request.clone();
        if request.temperature.is_none() {
            request.temperature = self.config.temperature;
        }
        if request.top_p.is_none() {
            request.top_p = self.config.top_p;
        }
        if request.max_tokens.is_none() {
            request.max_tokens = self.config.max_tokens;
        }
        if request.frequency_penalty.is_none() {
            request.frequency_penalty = self.config.frequency_penalty;
        }
        if request.presence_penalty.is_none() {
            request.presence_penalty = self.config.presence_penalty;
        }
        if request.model.is_empty() {
            request.model = self.config.model.clone();
        }
        request
    }

    /// Build headers for API requests
    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() && api_key != "none" {
                let value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|_| ForemanError::provider("API key contains invalid characters"))?;
                headers.insert(AUTHORIZATION, value);
            }
        }
        Ok(headers)
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "sending chat request"
        );

        let response = self
            .http_client
            .post(&url)
            .headers(self.build_headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| ForemanError::provider(format!("request failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(ForemanError::Unauthorized {
                message: "authentication failed, check your API key".to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(ForemanError::RateLimitExceeded),
            status => {
                let error_body: Option<serde_json::Value> = response.json().await.ok();
                let error_msg = error_body
                    .as_ref()
                    .and_then(|v| v.get("error").and_then(|e| e.get("message")))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                Err(ForemanError::provider(format!(
                    "API request failed ({}): {}",
                    status, error_msg
                )))
            }
        }
    }
}

#[async_trait]
impl ChatProvider for LlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut request = self.apply_defaults(request);
        request.stream = false;

        let response = self.send_chat(&request).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ForemanError::provider(format!("failed to parse response: {}", e)))?;
        Ok(body)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let mut request = self.apply_defaults(request);
        request.stream = true;

        let response = self.send_chat(&request).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            let mut partial_calls: Vec<PartialToolCall> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk
                    .map_err(|e| ForemanError::provider(format!("failed to read chunk: {}", e)))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE lines
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline_pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        if !partial_calls.is_empty() {
                            yield StreamEvent::ToolCalls(assemble_tool_calls(&partial_calls));
                        }
                        yield StreamEvent::Done;
                        return;
                    }

                    let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) else {
                        continue;
                    };
                    if let Some(usage) = parsed.usage {
                        yield StreamEvent::Usage(usage);
                    }
                    let Some(choice) = parsed.choices.into_iter().next() else {
                        continue;
                    };
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            yield StreamEvent::Content(content);
                        }
                    }
                    if let Some(deltas) = choice.delta.tool_calls {
                        for delta in deltas {
                            merge_tool_call_delta(&mut partial_calls, delta);
                        }
                    }
                    if choice.finish_reason.is_some() && !partial_calls.is_empty() {
                        yield StreamEvent::ToolCalls(assemble_tool_calls(&partial_calls));
                        partial_calls.clear();
                    }
                }
            }

            yield StreamEvent::Done;
        };

        Ok(Box::pin(stream))
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Streaming chunk as sent by OpenAI-compatible servers
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Incremental tool-call fragment within a streaming delta
#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

fn merge_tool_call_delta(partials: &mut Vec<PartialToolCall>, delta: ToolCallDelta) {
    while partials.len() <= delta.index {
        partials.push(PartialToolCall::default());
    }
    let slot = &mut partials[delta.index];
    if let Some(id) = delta.id {
        slot.id = id;
    }
    if let Some(function) = delta.function {
        if let Some(name) = function.name {
            slot.name.push_str(&name);
        }
        if let Some(arguments) = function.arguments {
            slot.arguments.push_str(&arguments);
        }
    }
}

fn assemble_tool_calls(partials: &[PartialToolCall]) -> Vec<ToolCall> {
    partials
        .iter()
        .filter(|p| !p.name.is_empty())
        .map(|p| {
            ToolCall::function(
                if p.id.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    p.id.clone()
                },
                p.name.clone(),
                if p.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    p.arguments.clone()
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_deltas_accumulate_across_chunks() {
        let mut partials = Vec::new();
        merge_tool_call_delta(
            &mut partials,
            ToolCallDelta {
                index: 0,
                id: Some("call_7".to_string()),
                function: Some(FunctionDelta {
                    name: Some("read_file".to_string()),
                    arguments: Some("{\"pa".to_string()),
                }),
            },
        );
        merge_tool_call_delta(
            &mut partials,
            ToolCallDelta {
                index: 0,
                id: None,
                function: Some(FunctionDelta {
                    name: None,
                    arguments: Some("th\":\"a.txt\"}".to_string()),
                }),
            },
        );

        let calls = assemble_tool_calls(&partials);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_7");
        assert_eq!(calls[0].function.name, "read_file");
        assert_eq!(calls[0].function.arguments, "{\"path\":\"a.txt\"}");
    }

    #[test]
    fn unnamed_partials_are_dropped_on_assembly() {
        let partials = vec![PartialToolCall::default()];
        assert!(assemble_tool_calls(&partials).is_empty());
    }

    #[test]
    fn defaults_fill_only_missing_fields() {
        let config = LlmConfig::new("http://localhost:1234/v1", "test-model", None)
            .with_temperature(0.9)
            .with_max_tokens(512);
        let client = LlmClient::new(config).unwrap();

        let request = ChatRequest::new("", vec![]).with_temperature(0.1);
        let filled = client.apply_defaults(&request);
        assert_eq!(filled.temperature, Some(0.1));
        assert_eq!(filled.max_tokens, Some(512));
        assert_eq!(filled.model, "test-model");
    }
}
