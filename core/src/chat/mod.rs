//! Conversation coordination
//!
//! Ties one session together: every user turn first goes through tool
//! orchestration, then (unless a tool fully answered it) through the agent
//! loop. After each turn the history is checked against the token budget
//! and compacted with a model-written summary when it has grown too large.

use crate::agent::AgentLoop;
use crate::error::Result;
use crate::llm::{ChatMessage, ChatProvider, ChatRequest, MessageRole};
use crate::orchestrate::{OrchestrationOutcome, ToolOrchestrator};
use crate::session::{ConversationSession, SessionStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sampling temperature for summarization; low so summaries stay factual
const SUMMARY_TEMPERATURE: f32 = 0.2;

/// Marker prefix of the system message a compaction leaves behind
const SUMMARY_HEADER: &str = "Summary of the earlier conversation:";

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize conversation transcripts. \
    Produce a concise factual summary of the conversation below, preserving \
    file names, decisions, tool results, and any unresolved questions. \
    Reply with the summary only.";

/// Result of compacting a history
pub struct CompactionResult {
    pub messages: Vec<ChatMessage>,
    pub summary: String,
    /// How many messages were folded into the summary
    pub condensed: usize,
}

/// Token-budget driven history compaction
pub struct HistoryCompactor {
    /// Estimated-token ceiling before compaction kicks in
    token_budget: usize,
    /// Number of trailing messages kept verbatim
    tail_window: usize,
}

impl HistoryCompactor {
    pub fn new(token_budget: usize, tail_window: usize) -> Self {
        Self {
            token_budget,
            tail_window: tail_window.max(1),
        }
    }

    /// Crude token estimate: one token per four characters of content
    pub fn estimate_tokens(messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| m.content.len()).sum::<usize>() / 4
    }

    pub fn needs_compaction(&self, messages: &[ChatMessage]) -> bool {
        Self::estimate_tokens(messages) > self.token_budget
    }

    /// Fold everything except the tail window into one summary message.
    ///
    /// Returns None when there is nothing to fold. A summarization failure
    /// leaves the history untouched and is reported as an error.
    pub async fn compact(
        &self,
        provider: &dyn ChatProvider,
        messages: &[ChatMessage],
    ) -> Result<Option<CompactionResult>> {
        if messages.len() <= self.tail_window {
            return Ok(None);
        }
        let split = messages.len() - self.tail_window;
        let (prefix, tail) = messages.split_at(split);

        // If the prefix is nothing but earlier summaries there is no new
        // material to fold; compacting again would just re-summarize the
        // summary.
        if prefix
            .iter()
            .all(|m| matches!(m.role, MessageRole::System) && m.content.starts_with(SUMMARY_HEADER))
        {
            return Ok(None);
        }

        let transcript: String = prefix
            .iter()
            .map(|m| format!("[{}] {}\n", m.role.as_str(), m.content))
            .collect();

        let request = ChatRequest::new(
            provider.model(),
            vec![
                ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                ChatMessage::user(transcript),
            ],
        )
        .with_temperature(SUMMARY_TEMPERATURE);

        let response = provider.chat(&request).await?;
        let summary = response.content().trim().to_string();
        if summary.is_empty() {
            warn!("summarization returned empty content, keeping history");
            return Ok(None);
        }

        let mut compacted = Vec::with_capacity(1 + tail.len());
        compacted.push(ChatMessage::system(format!(
            "{}\n{}",
            SUMMARY_HEADER, summary
        )));
        compacted.extend_from_slice(tail);

        info!(
            condensed = prefix.len(),
            kept = tail.len(),
            "compacted conversation history"
        );
        Ok(Some(CompactionResult {
            messages: compacted,
            summary,
            condensed: prefix.len(),
        }))
    }
}

/// What one user turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    /// Registry tool that ran before (or instead of) the agent
    pub tool: Option<String>,
    /// True when the tool output was the whole answer
    pub bypassed_agent: bool,
    /// False when the agent hit its iteration cap or was cancelled
    pub completed: bool,
}

/// Drives a whole session: orchestration, agent loop, compaction,
/// persistence
pub struct ChatCoordinator {
    provider: Arc<dyn ChatProvider>,
    orchestrator: ToolOrchestrator,
    agent: AgentLoop,
    compactor: HistoryCompactor,
    store: SessionStore,
    session: ConversationSession,
    system_prompt: String,
}

impl ChatCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        orchestrator: ToolOrchestrator,
        agent: AgentLoop,
        compactor: HistoryCompactor,
        store: SessionStore,
        session: ConversationSession,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            agent,
            compactor,
            store,
            session,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    /// Start over with a fresh session; the old one stays on disk
    pub fn reset(&mut self) {
        self.session = ConversationSession::new();
    }

    /// Process one user objective end to end
    pub async fn handle_turn(
        &mut self,
        objective: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let outcome = self.orchestrator.try_orchestrate(objective, cancel).await?;

        let turn = match outcome {
            OrchestrationOutcome::Complete { tool, response } => {
                debug!(%tool, "tool answered without the agent");
                self.session.messages.push(ChatMessage::user(objective));
                self.session
                    .messages
                    .push(ChatMessage::assistant(&response));
                self.session.record_tool_use(&tool);
                self.session
                    .agent_state
                    .record_thought(format!("tool '{}' answered directly", tool));
                TurnOutcome {
                    response,
                    tool: Some(tool),
                    bypassed_agent: true,
                    completed: true,
                }
            }
            OrchestrationOutcome::Forward {
                tool,
                objective: enriched,
            } => {
                self.session.record_tool_use(&tool);
                self.session
                    .agent_state
                    .record_thought(format!("tool '{}' ran, forwarding to agent", tool));
                let result = self.run_agent(objective, &enriched, cancel).await?;
                TurnOutcome {
                    response: result.0,
                    tool: Some(tool),
                    bypassed_agent: false,
                    completed: result.1,
                }
            }
            OrchestrationOutcome::Skipped { reason } => {
                debug!(%reason, "no tool ran for this turn");
                let result = self.run_agent(objective, objective, cancel).await?;
                TurnOutcome {
                    response: result.0,
                    tool: None,
                    bypassed_agent: false,
                    completed: result.1,
                }
            }
        };

        self.compact_if_needed().await;
        self.session.touch();
        if let Err(e) = self.store.save(&self.session).await {
            // Persistence problems must not eat the answer
            warn!(error = %e, "failed to save session");
        }

        Ok(turn)
    }

    /// Run the agent over the session history. The user-visible objective
    /// and the (possibly tool-enriched) one the model sees can differ; the
    /// transcript records what the model saw.
    async fn run_agent(
        &mut self,
        _objective: &str,
        model_objective: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, bool)> {
        self.session
            .messages
            .push(ChatMessage::user(model_objective));

        let mut working = Vec::with_capacity(self.session.messages.len() + 1);
        working.push(ChatMessage::system(&self.system_prompt));
        working.extend(self.session.messages.iter().cloned());

        let result = self.agent.run(&mut working, cancel).await?;

        // Keep everything the run appended, minus our injected system prompt
        self.session.messages = working
            .into_iter()
            .skip(1)
            .collect();
        if !result.response.is_empty() || result.completed {
            self.session
                .messages
                .push(ChatMessage::assistant(&result.response));
        }
        for invocation in &result.invocations {
            if invocation.tool == "read_file" && !invocation.is_error {
                if let Some(path) = extract_path(&invocation.arguments) {
                    self.session.agent_state.record_loaded_file(path);
                }
            }
        }

        Ok((result.response, result.completed))
    }

    async fn compact_if_needed(&mut self) {
        if !self.compactor.needs_compaction(&self.session.messages) {
            return;
        }
        match self
            .compactor
            .compact(self.provider.as_ref(), &self.session.messages)
            .await
        {
            Ok(Some(result)) => {
                self.session
                    .agent_state
                    .record_thought(format!("condensed {} messages", result.condensed));
                self.session.agent_state.last_summary = Some(result.summary);
                self.session.messages = result.messages;
            }
            Ok(None) => {}
            Err(e) => {
                // History stays exactly as it was
                warn!(error = %e, "history compaction failed");
            }
        }
    }

    /// Force a compaction regardless of the budget (the `/compact` command)
    pub async fn compact_now(&mut self) -> Result<bool> {
        match self
            .compactor
            .compact(self.provider.as_ref(), &self.session.messages)
            .await?
        {
            Some(result) => {
                self.session
                    .agent_state
                    .record_thought(format!("condensed {} messages", result.condensed));
                self.session.agent_state.last_summary = Some(result.summary);
                self.session.messages = result.messages;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn extract_path(raw_arguments: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(raw_arguments)
        .ok()?
        .get("path")?
        .as_str()
        .map(|s| s.to_string())
}
