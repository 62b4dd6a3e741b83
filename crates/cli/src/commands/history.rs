//! `botloom history` — Inspect stored conversations.

use crate::setup;
use botloom_config::AppConfig;
use botloom_core::history::Window;
use botloom_core::turn::{ConversationId, Role, Turn};

pub async fn run(
    conversation: Option<String>,
    last: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let store = setup::open_history(&config.history).await?;

    let Some(conversation) = conversation else {
        let ids = store.list_conversations().await?;
        if ids.is_empty() {
            println!("No conversations yet.");
        }
        for id in ids {
            println!("{id}");
        }
        return Ok(());
    };

    let id = ConversationId::from(conversation.as_str());
    let window = match last {
        Some(n) => Window::last_turns(n),
        None => Window::all(),
    };
    let turns = store.read_window(&id, window).await?;
    if turns.is_empty() {
        println!("No turns stored for conversation {id}.");
        return Ok(());
    }

    for turn in &turns {
        println!("{}", format_turn(turn));
    }
    let tokens: usize = turns.iter().map(|t| t.token_cost).sum();
    println!("\n{} turn(s), ~{} tokens", turns.len(), tokens);
    Ok(())
}

fn format_turn(turn: &Turn) -> String {
    let label = match turn.role {
        Role::User => "You",
        Role::Assistant => "Bot",
        Role::PluginObservation => "Plugin",
    };
    format!(
        "#{:<4} {} {:>6} > {}",
        turn.seq,
        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
        label,
        turn.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use botloom_core::turn::NewTurn;

    #[test]
    fn formats_role_and_seq() {
        let turn = NewTurn::new(Role::PluginObservation, "calculator returned: 4", 9, "k")
            .commit(ConversationId::from("c1"), 2);
        let line = format_turn(&turn);
        assert!(line.starts_with("#2"));
        assert!(line.contains("Plugin > calculator returned: 4"));
    }
}
