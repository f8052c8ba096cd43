//! Structured error types for Foreman
//!
//! Provides type-safe error handling with user-friendly messages. Tool-level
//! failures are converted to result objects at the boundary where they occur;
//! only classification, configuration, and model-provider failures travel as
//! errors.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for Foreman operations
#[derive(Error, Debug)]
pub enum ForemanError {
    // =========================================================================
    // User Input Errors
    // =========================================================================
    /// Objective was empty or unusable
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Registry or runtime configuration is missing/malformed.
    /// Callers degrade to an empty tool set instead of aborting.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Missing required config value
    #[error("missing required configuration: {key}")]
    MissingConfig { key: String },

    // =========================================================================
    // Provider / API Errors
    // =========================================================================
    /// Authentication/authorization errors
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Rate limit exceeded (429)
    #[error("rate limit exceeded, try again later")]
    RateLimitExceeded,

    /// Model provider returned an error; terminal for the current call,
    /// never retried automatically
    #[error("provider error: {message}")]
    Provider { message: String },

    // =========================================================================
    // Tool Execution Errors
    // =========================================================================
    /// Tool execution failed (non-zero exit or provider exception)
    #[error("tool execution failed: {tool_name} - {message}")]
    ToolExecution { tool_name: String, message: String },

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    /// A path resolved outside the workspace root; rejected before any I/O
    #[error("sandbox violation: path '{path}' escapes the workspace root")]
    SandboxViolation { path: PathBuf },

    // =========================================================================
    // Agent Errors
    // =========================================================================
    /// The agent loop exhausted its iteration budget
    #[error("agent exceeded maximum iterations ({max_iterations}) without completing")]
    IterationLimit { max_iterations: usize },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Session not found on disk
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// I/O wrapper for session and registry file access
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForemanError {
    /// Shorthand for an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for a provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Message suitable for direct display to the user.
    ///
    /// Raw internals (I/O chains, HTTP bodies) are not surfaced here.
    pub fn user_message(&self) -> String {
        match self {
            Self::Io(_) => "a file operation failed; see logs for details".to_string(),
            other => other.to_string(),
        }
    }
}

/// Convenience alias used across the core crate
pub type Result<T> = std::result::Result<T, ForemanError>;
