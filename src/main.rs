//! `foreman` - a tool-orchestrating terminal assistant
//!
//! Classifies each request, runs a matching registered tool when one fits,
//! and otherwise hands the request to a sandboxed tool-using agent loop
//! against an OpenAI-compatible endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use foreman_core::agent::{AgentLoop, FileSystemToolDispatcher};
use foreman_core::chat::{ChatCoordinator, HistoryCompactor};
use foreman_core::config::ForemanConfig;
use foreman_core::llm::{ChatMessage, ChatProvider, ChatRequest, LlmClient};
use foreman_core::orchestrate::ToolOrchestrator;
use foreman_core::provider::{BuiltinToolProvider, ProcessToolProvider, ToolProvider};
use foreman_core::registry::ToolRegistry;
use foreman_core::session::{ConversationSession, SessionStore};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Commands};

mod cli;
mod repl;

const SYSTEM_PROMPT: &str = "You are Foreman, a terminal assistant with \
    filesystem tools scoped to a workspace. Use the tools to inspect files \
    before answering questions about them. Keep answers concise.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman=warn,foreman_core=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(ForemanConfig::default_path);
    let mut config =
        ForemanConfig::load(&config_path).context("failed to load configuration")?;
    if let Some(workspace) = &cli.workspace {
        config.workspace_root = workspace.clone();
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.llm.base_url = base_url.clone();
    }
    if let Some(registry) = &cli.registry {
        config.registry_path = registry.clone();
    }
    if cli.write {
        config.enable_writes = true;
    }

    match &cli.command {
        Some(Commands::Ask { query }) => {
            let question = query.join(" ");
            if question.trim().is_empty() {
                anyhow::bail!("ask requires a question");
            }
            stream_answer(&config, &question).await
        }
        Some(Commands::Tools) => list_tools(&config).await,
        Some(Commands::Sessions) => list_sessions().await,
        Some(Commands::Resume { id }) => {
            let store = SessionStore::default_location();
            let session = store.load(id).await?;
            let (coordinator, registry) = build_coordinator(&config, store, session).await?;
            repl::run(coordinator, registry).await
        }
        None if !cli.query.is_empty() => {
            let objective = cli.query.join(" ");
            let store = SessionStore::default_location();
            let (mut coordinator, _registry) =
                build_coordinator(&config, store, ConversationSession::new()).await?;
            let outcome = coordinator
                .handle_turn(&objective, &CancellationToken::new())
                .await?;
            println!("{}", outcome.response);
            if !outcome.completed {
                eprintln!("{}", Style::new().yellow().apply_to("(stopped early)"));
            }
            Ok(())
        }
        None => {
            let store = SessionStore::default_location();
            let (coordinator, registry) =
                build_coordinator(&config, store, ConversationSession::new()).await?;
            repl::run(coordinator, registry).await
        }
    }
}

fn tool_providers() -> Vec<Arc<dyn ToolProvider>> {
    vec![
        Arc::new(ProcessToolProvider::new()),
        Arc::new(BuiltinToolProvider::new()),
    ]
}

async fn build_coordinator(
    config: &ForemanConfig,
    store: SessionStore,
    mut session: ConversationSession,
) -> Result<(ChatCoordinator, Arc<ToolRegistry>)> {
    let provider: Arc<dyn ChatProvider> = Arc::new(
        LlmClient::new(config.llm.clone()).context("failed to build LLM client")?,
    );

    let registry = Arc::new(ToolRegistry::new(
        config.registry_path.clone(),
        tool_providers(),
    ));
    registry.reload(&CancellationToken::new()).await?;
    let orchestrator = ToolOrchestrator::new(
        registry.clone(),
        config.auto_execute_tools,
        config.max_tool_output_chars,
    );

    let dispatcher = Arc::new(
        FileSystemToolDispatcher::new(&config.workspace_root, config.enable_writes)
            .context("failed to prepare the workspace sandbox")?,
    );
    let agent = AgentLoop::new(provider.clone(), dispatcher, config.max_iterations);
    let compactor = HistoryCompactor::new(config.token_budget, config.tail_window);

    session.agent_state.configuration_snapshot = config.snapshot();

    let coordinator = ChatCoordinator::new(
        provider,
        orchestrator,
        agent,
        compactor,
        store,
        session,
        SYSTEM_PROMPT,
    );
    Ok((coordinator, registry))
}

async fn stream_answer(config: &ForemanConfig, question: &str) -> Result<()> {
    let client = LlmClient::new(config.llm.clone()).context("failed to build LLM client")?;
    let request = ChatRequest::new(
        config.llm.model.clone(),
        vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(question),
        ],
    )
    .with_streaming(true);

    let mut stream = client.chat_stream(&request).await?;
    let mut stdout = std::io::stdout();
    let mut answer = String::new();
    let mut stream_error = None;
    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", Style::new().yellow().apply_to("(interrupted)"));
                None
            }
        };
        let Some(event) = event else { break };
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                stream_error = Some(e);
                break;
            }
        };
        if let Some(delta) = event.content() {
            write!(stdout, "{}", delta)?;
            stdout.flush()?;
            answer.push_str(delta);
        }
        if event.is_done() {
            break;
        }
    }
    println!();

    // Whatever arrived before the stream ended is committed, even when it
    // was cut short.
    if !answer.is_empty() {
        let store = SessionStore::default_location();
        let mut session = ConversationSession::new();
        session.messages.push(ChatMessage::user(question));
        session.messages.push(ChatMessage::assistant(&answer));
        session.touch();
        if let Err(e) = store.save(&session).await {
            eprintln!(
                "{}",
                Style::new().yellow().apply_to(format!("failed to save session: {}", e))
            );
        }
    }

    if let Some(e) = stream_error {
        return Err(e.into());
    }
    Ok(())
}

async fn list_tools(config: &ForemanConfig) -> Result<()> {
    let registry = ToolRegistry::new(config.registry_path.clone(), tool_providers());
    registry.reload(&CancellationToken::new()).await?;

    let tools = registry.tools();
    if tools.is_empty() {
        println!(
            "No tools registered (looked in {})",
            config.registry_path.display()
        );
        return Ok(());
    }

    let green = Style::new().green();
    let red = Style::new().red();
    for descriptor in tools.iter() {
        let status = if descriptor.is_available() {
            green.apply_to("available").to_string()
        } else {
            format!(
                "{} ({})",
                red.apply_to("unavailable"),
                descriptor.availability.detail
            )
        };
        println!(
            "{:<24} {:<12} {}",
            descriptor.config.display_name(),
            descriptor.config.kind(),
            status
        );
    }
    Ok(())
}

async fn list_sessions() -> Result<()> {
    let store = SessionStore::default_location();
    let ids = store.list().await?;
    if ids.is_empty() {
        println!("No saved sessions");
        return Ok(());
    }
    for id in ids {
        let session = store.load(&id).await?;
        println!(
            "{}  {}  {} messages",
            id,
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.messages.len()
        );
    }
    Ok(())
}
