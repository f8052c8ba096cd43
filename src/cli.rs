//! Command-line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "foreman",
    about = "Tool-orchestrating terminal assistant",
    version
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace root for the agent's filesystem tools
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Model identifier, overriding the configured one
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// API base URL, overriding the configured one
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Tool registry file, overriding the configured one
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Allow the agent to write files inside the workspace
    #[arg(long, global = true)]
    pub write: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Free-form query; runs one turn and exits
    #[arg(trailing_var_arg = true)]
    pub query: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a raw model answer, bypassing tools and the agent loop
    Ask {
        /// The question to send
        query: Vec<String>,
    },
    /// List registered tools and their availability
    Tools,
    /// List saved sessions, most recent first
    Sessions,
    /// Resume a saved session in the interactive shell
    Resume {
        /// Session id, as shown by `foreman sessions`
        id: String,
    },
}
