//! Classify a model response as a final answer or a plugin call.
//!
//! Rules, applied in order:
//!
//! 1. Native function calls returned by the provider. The first one wins;
//!    the loop runs one plugin per step.
//! 2. The text protocol: an `Action: <plugin>` line followed by an
//!    `Action Input: <json>` line. The JSON may span several lines or sit
//!    inside a ```json fence. Text after the first complete object (a
//!    made-up `Observation:` line, say) is ignored.
//! 3. Anything else is a final answer, minus a leading `Final Answer:`.

use botloom_core::provider::ModelResponse;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelAction {
    FinalAnswer(String),
    CallPlugin {
        name: String,
        /// Unparseable argument text is kept as a JSON string so the
        /// registry rejects it with a readable schema error.
        arguments: serde_json::Value,
    },
}

impl ModelAction {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::FinalAnswer(_))
    }
}

/// Parse a raw model response.
pub fn parse_response(response: &ModelResponse) -> ModelAction {
    if let Some(call) = response.plugin_calls.first() {
        if response.plugin_calls.len() > 1 {
            warn!(
                requested = response.plugin_calls.len(),
                plugin = %call.name,
                "Model requested several plugin calls; running only the first"
            );
        }
        return ModelAction::CallPlugin {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        };
    }

    if let Some(action) = parse_text_action(&response.content) {
        return action;
    }

    ModelAction::FinalAnswer(final_answer_text(&response.content))
}

fn parse_text_action(content: &str) -> Option<ModelAction> {
    let lines: Vec<&str> = content.lines().collect();
    let (idx, name) = lines.iter().enumerate().find_map(|(i, line)| {
        line.trim()
            .strip_prefix("Action:")
            .map(|rest| (i, rest.trim().to_string()))
    })?;
    if name.is_empty() {
        return None;
    }

    let input_at = lines[idx + 1..]
        .iter()
        .position(|line| line.trim_start().starts_with("Action Input:"))?
        + idx
        + 1;

    let first = lines[input_at]
        .trim_start()
        .trim_start_matches("Action Input:")
        .to_string();
    let mut raw = first;
    for line in &lines[input_at + 1..] {
        raw.push('\n');
        raw.push_str(line);
    }
    let raw = strip_fence(raw.trim());

    let arguments = leading_json(raw)
        .or_else(|| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| serde_json::Value::String(raw.to_string()));
    Some(ModelAction::CallPlugin { name, arguments })
}

/// The first JSON object or array at the start of `raw`, ignoring what follows.
fn leading_json(raw: &str) -> Option<serde_json::Value> {
    let value = serde_json::Deserializer::from_str(raw)
        .into_iter::<serde_json::Value>()
        .next()?
        .ok()?;
    (value.is_object() || value.is_array()).then_some(value)
}

/// Strip a surrounding ```json ... ``` fence, if present.
fn strip_fence(raw: &str) -> &str {
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = match inner.rfind("```") {
        Some(end) => &inner[..end],
        None => inner,
    };
    inner.trim()
}

fn final_answer_text(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.find("Final Answer:") {
        Some(pos) => trimmed[pos + "Final Answer:".len()..].trim().to_string(),
        None => trimmed.to_string(),
    }
}
