//! Prompt assembly under a hard token budget.
//!
//! The prompt has two parts:
//!
//! 1. **Reserved part**: the system section (instructions plus plugin
//!    descriptions) and the function-tool definitions sent alongside it.
//!    Always included; if it alone does not fit, assembly fails.
//! 2. **History window**: turns walked newest → oldest by cached cost,
//!    stopping at the first turn that does not fit. Everything older than
//!    that turn is dropped too, so the kept turns are a contiguous suffix.
//!
//! # Determinism
//!
//! Identical inputs always produce an identical prompt. No clocks or
//! randomness are involved, which the response cache relies on.

use crate::token::{MESSAGE_OVERHEAD, TokenCounter};
use botloom_core::error::BudgetError;
use botloom_core::plugin::PluginDescriptor;
use botloom_core::provider::{ModelRequest, PromptMessage, SamplingParams, plugin_definition};
use botloom_core::turn::Turn;
use serde::{Deserialize, Serialize};

// ── Types ─────────────────────────────────────────────────────────────────

/// Token budget for one assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBudget {
    /// Hard ceiling on the assembled prompt.
    pub max: usize,
}

impl PromptBudget {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self { max: 4096 }
    }
}

/// A prompt ready to send, with its accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledPrompt {
    /// Instructions plus the plugin section.
    pub system: String,
    /// Kept history, chronological.
    pub messages: Vec<PromptMessage>,
    pub budget: PromptBudget,
    /// Cost of the system section including its message overhead, plus
    /// the plugin definitions.
    pub reserved_tokens: usize,
    /// `reserved_tokens` plus the cached cost of every kept turn.
    pub total_tokens: usize,
    pub turns_included: usize,
    pub turns_dropped: usize,
}

impl AssembledPrompt {
    /// Flat text form: the system section, then one `[role]` block per message.
    pub fn render(&self) -> String {
        let mut out = self.system.clone();
        for msg in &self.messages {
            out.push_str("\n\n[");
            out.push_str(msg.role.as_str());
            out.push_str("]\n");
            out.push_str(&msg.content);
        }
        out
    }

    /// Tokens still free under the budget.
    pub fn remaining(&self) -> usize {
        self.budget.max.saturating_sub(self.total_tokens)
    }

    /// Build the provider request for this prompt.
    pub fn to_model_request(
        &self,
        model: impl Into<String>,
        plugins: Vec<PluginDescriptor>,
        sampling: SamplingParams,
    ) -> ModelRequest {
        ModelRequest {
            model: model.into(),
            system: self.system.clone(),
            messages: self.messages.clone(),
            plugins,
            sampling,
        }
    }
}

// ── System section ────────────────────────────────────────────────────────

const CALL_PROTOCOL: &str = "\
To call a plugin, reply with exactly two lines and nothing else:
Action: <plugin name>
Action Input: <JSON object matching the plugin's arguments>
Call at most one plugin per reply. The result comes back as
`<plugin name> returned: ...` or `<plugin name> failed: ...`.
When you can answer, reply with:
Final Answer: <your answer>";

/// Render the system section: instructions, then a `## Plugins` section.
///
/// With no plugins the section is just the instructions.
pub fn system_section(instructions: &str, plugins: &[PluginDescriptor]) -> String {
    if plugins.is_empty() {
        return instructions.to_string();
    }

    let mut out = String::with_capacity(instructions.len() + 256 * plugins.len());
    out.push_str(instructions);
    out.push_str("\n\n## Plugins\n");
    for plugin in plugins {
        out.push_str("- ");
        out.push_str(&plugin.name);
        out.push_str(": ");
        out.push_str(&plugin.usage);
        out.push_str("\n  arguments: ");
        out.push_str(&plugin.schema.to_string());
        out.push('\n');
    }
    out.push('\n');
    out.push_str(CALL_PROTOCOL);
    out
}

/// Tokens taken by the function-tool definitions sent with the request.
pub fn plugin_definitions_cost(
    counter: &dyn TokenCounter,
    plugins: &[PluginDescriptor],
) -> Result<usize, botloom_core::error::TokenizationError> {
    let mut total = 0;
    for plugin in plugins {
        total += counter.count(&plugin_definition(plugin).to_string())?;
    }
    Ok(total)
}

// ── Assembly ──────────────────────────────────────────────────────────────

/// Assemble a prompt from instructions, plugins and a chronological history.
///
/// Fails with [`BudgetError::ReservedExceedsMax`] before looking at history
/// when the reserved part alone exceeds `budget.max`.
pub fn assemble(
    counter: &dyn TokenCounter,
    instructions: &str,
    plugins: &[PluginDescriptor],
    history: &[Turn],
    budget: PromptBudget,
) -> botloom_core::Result<AssembledPrompt> {
    let system = system_section(instructions, plugins);
    let reserved =
        counter.count(&system)? + MESSAGE_OVERHEAD + plugin_definitions_cost(counter, plugins)?;
    if reserved > budget.max {
        return Err(BudgetError::ReservedExceedsMax {
            reserved,
            max: budget.max,
        }
        .into());
    }

    let mut remaining = budget.max - reserved;
    let mut kept = 0usize;
    for turn in history.iter().rev() {
        if turn.token_cost > remaining {
            break;
        }
        remaining -= turn.token_cost;
        kept += 1;
    }

    let window = &history[history.len() - kept..];
    let messages = window
        .iter()
        .map(|turn| PromptMessage {
            role: turn.role,
            content: turn.content.clone(),
        })
        .collect();

    Ok(AssembledPrompt {
        system,
        messages,
        budget,
        reserved_tokens: reserved,
        total_tokens: budget.max - remaining,
        turns_included: kept,
        turns_dropped: history.len() - kept,
    })
}
