//! Conversation sessions and their on-disk persistence
//!
//! Sessions are stored in `$XDG_DATA_DIR/foreman/sessions/` (or the
//! platform equivalent) as `session_{id}.json`, with `latest.json` holding
//! a copy of the most recently saved one for quick resume. Writes go
//! through a temp file plus rename so a crash never leaves a torn session
//! on disk.

use crate::error::{ForemanError, Result};
use crate::llm::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Thought-log entries kept per session; older entries are evicted first
const THOUGHT_LOG_CAPACITY: usize = 50;

/// Working state the agent accumulates across a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// Files the agent has read this session, workspace-relative
    #[serde(default)]
    pub loaded_files: Vec<String>,
    /// Tools currently exposed to the model
    #[serde(default)]
    pub active_tools: Vec<String>,
    /// Flattened view of the configuration the session started with
    #[serde(default)]
    pub configuration_snapshot: HashMap<String, String>,
    /// Rolling log of notable events, capped at [`THOUGHT_LOG_CAPACITY`]
    #[serde(default)]
    pub thought_log: VecDeque<String>,
    /// Most recent history-compaction summary, if any
    #[serde(default)]
    pub last_summary: Option<String>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl AgentState {
    /// Append a thought, evicting the oldest entry once the log is full
    pub fn record_thought(&mut self, thought: impl Into<String>) {
        if self.thought_log.len() >= THOUGHT_LOG_CAPACITY {
            self.thought_log.pop_front();
        }
        self.thought_log.push_back(thought.into());
        self.last_updated = Utc::now();
    }

    /// Remember a file the agent loaded, deduplicated
    pub fn record_loaded_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.loaded_files.contains(&path) {
            self.loaded_files.push(path);
            self.last_updated = Utc::now();
        }
    }
}

/// A persisted conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Full message history, including tool rounds
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub agent_state: AgentState,
    /// Names of registry tools that executed during this session
    #[serde(default)]
    pub tools_used: Vec<String>,
}

impl ConversationSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            agent_state: AgentState::default(),
            tools_used: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record a registry tool execution, deduplicated
    pub fn record_tool_use(&mut self, tool: impl Into<String>) {
        let tool = tool.into();
        if !self.tools_used.contains(&tool) {
            self.tools_used.push(tool);
        }
        self.touch();
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads and saves sessions under a single directory
pub struct SessionStore {
    dir: PathBuf,
    /// Serializes saves so concurrent writers cannot interleave the
    /// temp-then-rename dance on the same files
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store rooted at the platform data directory
    pub fn default_location() -> Self {
        let dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("foreman")
            .join("sessions");
        Self::new(dir)
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Persist the session and refresh `latest.json`
    pub async fn save(&self, session: &ConversationSession) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| ForemanError::configuration(format!("cannot serialize session: {}", e)))?;

        let final_path = self.dir.join(format!("session_{}.json", session.id));
        self.write_atomic(&final_path, &json, &format!("session_{}.tmp", session.id))
            .await?;
        self.write_atomic(&self.dir.join("latest.json"), &json, "latest.tmp")
            .await?;

        debug!(id = %session.id, "saved session");
        Ok(())
    }

    async fn write_atomic(&self, final_path: &PathBuf, json: &str, temp_name: &str) -> Result<()> {
        let temp_path = self.dir.join(temp_name);
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, final_path).await?;
        Ok(())
    }

    /// Load the most recently saved session, or None when nothing has been
    /// saved yet or the file is unreadable
    pub async fn load_latest(&self) -> Option<ConversationSession> {
        let path = self.dir.join("latest.json");
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "latest session is unreadable");
                None
            }
        }
    }

    /// Load a session by its exact id
    pub async fn load(&self, id: &str) -> Result<ConversationSession> {
        let path = self.dir.join(format!("session_{}.json", id));
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ForemanError::SessionNotFound {
                    session_id: id.to_string(),
                }
            } else {
                ForemanError::Io(e)
            }
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ForemanError::configuration(format!("session {} is corrupt: {}", id, e))
        })
    }

    /// Ids of every saved session, most recently updated first
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut sessions: Vec<(DateTime<Utc>, String)> = Vec::new();
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name
                .strip_prefix("session_")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            if let Ok(session) = self.load(id).await {
                sessions.push((session.updated_at, session.id));
            }
        }
        sessions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(sessions.into_iter().map(|(_, id)| id).collect())
    }
}
