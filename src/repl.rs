//! Interactive shell
//!
//! A plain line-oriented REPL. Slash commands manage the session; anything
//! else is one conversation turn. Ctrl-C cancels the in-flight turn rather
//! than the whole process.

use anyhow::Result;
use console::Style;
use foreman_core::chat::ChatCoordinator;
use foreman_core::registry::ToolRegistry;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(mut coordinator: ChatCoordinator, registry: Arc<ToolRegistry>) -> Result<()> {
    let cyan = Style::new().cyan().bold();
    let dim = Style::new().dim();
    let yellow = Style::new().yellow();

    println!("{}", cyan.apply_to("foreman interactive shell"));
    println!(
        "{}",
        dim.apply_to("type /help for commands, /quit to leave")
    );

    loop {
        let Some(line) = read_line(&format!("{} ", cyan.apply_to("you>"))).await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match line.as_str() {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("  /reset    start a fresh session");
                println!("  /compact  summarize older history now");
                println!("  /tools    reload and list registered tools");
                println!("  /quit     leave the shell");
                continue;
            }
            "/reset" => {
                coordinator.reset();
                println!("{}", dim.apply_to("started a fresh session"));
                continue;
            }
            "/compact" => {
                match coordinator.compact_now().await {
                    Ok(true) => println!("{}", dim.apply_to("history compacted")),
                    Ok(false) => println!("{}", dim.apply_to("nothing to compact")),
                    Err(e) => eprintln!("{}", yellow.apply_to(format!("compaction failed: {}", e))),
                }
                continue;
            }
            "/tools" => {
                if let Err(e) = registry.reload(&CancellationToken::new()).await {
                    eprintln!("{}", yellow.apply_to(format!("reload failed: {}", e)));
                    continue;
                }
                let tools = registry.tools();
                if tools.is_empty() {
                    println!("{}", dim.apply_to("no tools registered"));
                }
                for descriptor in tools.iter() {
                    let status = if descriptor.is_available() {
                        "available".to_string()
                    } else {
                        format!("unavailable ({})", descriptor.availability.detail)
                    };
                    println!(
                        "  {:<24} {}",
                        descriptor.config.display_name(),
                        dim.apply_to(status)
                    );
                }
                continue;
            }
            other if other.starts_with('/') => {
                println!("{}", yellow.apply_to(format!("unknown command: {}", other)));
                continue;
            }
            _ => {}
        }

        // Ctrl-C flags the token but the turn future keeps being polled,
        // so the agent winds down at its next checkpoint and everything
        // it produced so far stays in the session history.
        let cancel = CancellationToken::new();
        let turn = coordinator.handle_turn(&line, &cancel);
        tokio::pin!(turn);
        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    println!("\n{}", yellow.apply_to("(cancelling)"));
                }
            }
        };
        match result {
            Ok(outcome) => {
                if let Some(tool) = &outcome.tool {
                    println!("{}", dim.apply_to(format!("[via {}]", tool)));
                }
                println!("{}", outcome.response);
                if !outcome.completed {
                    println!("{}", yellow.apply_to("(stopped before finishing)"));
                }
            }
            Err(e) => eprintln!("{}", yellow.apply_to(format!("error: {}", e))),
        }
    }

    println!("{}", dim.apply_to("bye"));
    Ok(())
}

/// Prompt and read one line without blocking the runtime. None on EOF.
async fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let stdin = std::io::stdin();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(e),
        }
    })
    .await??;
    Ok(line)
}
