//! `botloom chat` — Interactive or single-message chat mode.

use crate::setup;
use botloom_agent::{Orchestrator, TurnRequest};
use botloom_config::AppConfig;
use botloom_core::event::DomainEvent;
use botloom_core::turn::ConversationId;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub async fn run(
    conversation: Option<String>,
    message: Option<String>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let orchestrator = match setup::build_orchestrator(&config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set BOTLOOM_API_KEY (or OPENAI_API_KEY), or add api_key to:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!("  Run `botloom init` to create a default config.");
            eprintln!();
            return Err(e);
        }
    };

    if verbose || config.test_mode {
        spawn_event_printer(&orchestrator);
    }

    let id = conversation
        .map(|c| ConversationId::from(c.as_str()))
        .unwrap_or_default();

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = run_one(&orchestrator, &id, msg).await;
        eprint!("\r              \r");
        let outcome = result?;
        println!("{}", outcome.answer);
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  botloom — interactive mode");
    println!();
    println!("  Model:         {}", config.model);
    println!("  Plugins:       {}", orchestrator.plugins().names().join(", "));
    println!("  History:       {}", orchestrator.history().name());
    println!("  Conversation:  {id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' to quit. Ctrl+C cancels the current turn.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input == "exit" || input == "quit" {
            break;
        }
        if !input.is_empty() {
            eprint!("  ...");
            let result = run_one(&orchestrator, &id, input.to_string()).await;
            eprint!("\r     \r");
            match result {
                Ok(outcome) => {
                    println!();
                    for line in outcome.answer.lines() {
                        println!("  Bot > {line}");
                    }
                    println!();
                }
                Err(failure) => {
                    eprintln!("  [Error] {failure}");
                    println!();
                }
            }
        }

        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Conversation saved as {id}.");
    println!();
    Ok(())
}

/// Run one turn; Ctrl+C cancels it at the next step boundary.
async fn run_one(
    orchestrator: &Orchestrator,
    id: &ConversationId,
    text: String,
) -> Result<botloom_agent::TurnOutcome, botloom_agent::TurnFailure> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let request = TurnRequest::new(id.clone(), text).with_cancel(cancel);
    let result = orchestrator.run_turn(request).await;
    watcher.abort();
    result
}

/// Print turn events to stderr as they happen.
fn spawn_event_printer(orchestrator: &Orchestrator) {
    let mut events = orchestrator.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let line = match event.as_ref() {
                DomainEvent::TurnStarted { timestamp, .. } => {
                    format!("{} turn started", timestamp.format("%H:%M:%S"))
                }
                DomainEvent::ModelCalled {
                    model,
                    cached,
                    attempts,
                    ..
                } => {
                    if *cached {
                        format!("model {model}: cache hit")
                    } else {
                        format!("model {model}: {attempts} attempt(s)")
                    }
                }
                DomainEvent::PluginInvoked {
                    plugin,
                    success,
                    duration_ms,
                    ..
                } => {
                    let status = if *success { "ok" } else { "failed" };
                    format!("plugin {plugin}: {status} in {duration_ms}ms")
                }
                DomainEvent::TurnCommitted { role, seq, .. } => format!("committed #{seq} ({role})"),
                DomainEvent::TurnCompleted { steps, .. } => format!("turn done after {steps} step(s)"),
                DomainEvent::TurnFailed { error, .. } => format!("turn failed: {error}"),
            };
            eprintln!("  · {line}");
        }
    });
}
