//! The orchestration loop: one user turn from question to final answer.
//!
//! For each state of the [`TurnMachine`] the orchestrator does the work and
//! feeds the outcome back as an event:
//!
//! - **AwaitingModel**: read the history window, assemble a prompt, consult
//!   the response cache, call the model (with retries), parse the reply.
//!   A final answer is committed as an assistant turn.
//! - **HandlingPluginCall**: invoke the plugin through the registry and
//!   commit an observation turn, whether the plugin succeeded or not.
//!
//! Turns in one conversation are serialized by a per-conversation lock held
//! for the whole user turn. Different conversations run concurrently and
//! share the cache and the plugin registry.

use crate::cache::{Fingerprint, ResponseCache};
use crate::machine::{TurnEvent, TurnMachine, TurnState};
use crate::parse::{ModelAction, parse_response};
use crate::prompt::{PromptBudget, assemble};
use crate::retry::{RetryPolicy, call_with_retry};
use crate::token::{HeuristicCounter, TokenCounter, message_cost};
use botloom_config::AppConfig;
use botloom_core::error::{BudgetError, Error, PersistenceError, PluginError};
use botloom_core::event::{DomainEvent, EventBus};
use botloom_core::history::{HistoryStore, Window};
use botloom_core::plugin::PluginRegistry;
use botloom_core::provider::{ModelResponse, Provider, SamplingParams};
use botloom_core::turn::{ConversationId, NewTurn, PluginCallRecord, Role, Turn};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Configuration ─────────────────────────────────────────────────────────

/// Everything the loop needs to know, passed in explicitly.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub system_instructions: String,
    pub sampling: SamplingParams,
    pub budget: PromptBudget,
    /// Plugin calls allowed per user turn.
    pub max_steps: u32,
    /// Turns read from history before budget trimming.
    pub history_window_turns: usize,
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
    /// Extra attempts for a failed history append.
    pub append_retries: u32,
}

impl OrchestratorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            system_instructions: config.agent.system_instructions.clone(),
            sampling: SamplingParams {
                temperature: config.temperature,
                max_tokens: Some(config.max_response_tokens),
                ..SamplingParams::default()
            },
            budget: PromptBudget::new(config.agent.max_prompt_tokens),
            max_steps: config.agent.max_steps,
            history_window_turns: config.agent.history_window_turns,
            retry: RetryPolicy::from_config(
                &config.retry,
                Duration::from_secs(config.model_timeout_secs),
            ),
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            append_retries: config.agent.append_retries,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

// ── Requests and results ──────────────────────────────────────────────────

/// One user turn to run.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: ConversationId,
    pub user_text: String,
    /// Prefix for the idempotency keys of every turn this request appends.
    /// Re-running a request with the same key never duplicates turns.
    pub request_key: Option<String>,
    pub cancel: CancellationToken,
}

impl TurnRequest {
    pub fn new(conversation_id: ConversationId, user_text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            user_text: user_text.into(),
            request_key: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_request_key(mut self, key: impl Into<String>) -> Self {
        self.request_key = Some(key.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A turn that reached `Done`.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    /// Plugin steps consumed.
    pub steps: u32,
    /// Every turn this request committed, in order.
    pub committed: Vec<Turn>,
}

/// A turn that reached `Failed`. Committed turns stay committed.
#[derive(Debug)]
pub struct TurnFailure {
    pub error: Error,
    pub committed: Vec<Turn>,
}

impl std::fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} turn(s) committed)", self.error, self.committed.len())
    }
}

impl std::error::Error for TurnFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    plugins: Arc<PluginRegistry>,
    history: Arc<dyn HistoryStore>,
    counter: Arc<dyn TokenCounter>,
    cache: Option<Arc<ResponseCache>>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    /// A new orchestrator with the heuristic token counter and no cache.
    pub fn new(
        provider: Arc<dyn Provider>,
        plugins: Arc<PluginRegistry>,
        history: Arc<dyn HistoryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            plugins,
            history,
            counter: Arc::new(HeuristicCounter),
            cache: None,
            events: Arc::new(EventBus::default()),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one user turn to completion.
    pub async fn start_turn(
        &self,
        conversation_id: &ConversationId,
        user_text: &str,
    ) -> Result<TurnOutcome, TurnFailure> {
        self.run_turn(TurnRequest::new(conversation_id.clone(), user_text))
            .await
    }

    /// Run one user turn with a cancellation token and optional request key.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, TurnFailure> {
        let lock = self.conversation_lock(&request.conversation_id);
        let _guard = lock.lock().await;

        let id = request.conversation_id.clone();
        info!(conversation_id = %id, model = %self.config.model, "Turn started");
        self.events.publish(DomainEvent::TurnStarted {
            conversation_id: id.to_string(),
            timestamp: Utc::now(),
        });

        let mut machine = TurnMachine::new(self.config.max_steps);
        let mut committed = Vec::new();

        match self.drive(&request, &mut machine, &mut committed).await {
            Ok(answer) => {
                info!(
                    conversation_id = %id,
                    steps = machine.steps(),
                    committed = committed.len(),
                    "Turn completed"
                );
                self.events.publish(DomainEvent::TurnCompleted {
                    conversation_id: id.to_string(),
                    steps: machine.steps(),
                    timestamp: Utc::now(),
                });
                Ok(TurnOutcome {
                    answer,
                    steps: machine.steps(),
                    committed,
                })
            }
            Err(error) => {
                if !machine.state().is_terminal() {
                    let event = match &error {
                        Error::ModelUnavailable { .. } => TurnEvent::ModelUnavailable,
                        Error::Cancelled => TurnEvent::Cancelled,
                        other => TurnEvent::Fatal(other.to_string()),
                    };
                    if let Err(e) = machine.advance(event) {
                        warn!(conversation_id = %id, "Could not record failure: {e}");
                    }
                }
                warn!(
                    conversation_id = %id,
                    steps = machine.steps(),
                    committed = committed.len(),
                    "Turn failed: {error}"
                );
                self.events.publish(DomainEvent::TurnFailed {
                    conversation_id: id.to_string(),
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                Err(TurnFailure { error, committed })
            }
        }
    }

    /// Advance the machine until it reaches `Done`, returning the answer.
    async fn drive(
        &self,
        request: &TurnRequest,
        machine: &mut TurnMachine,
        committed: &mut Vec<Turn>,
    ) -> Result<String, Error> {
        let id = &request.conversation_id;
        let request_key = request
            .request_key
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if request.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let user_cost = message_cost(self.counter.as_ref(), &request.user_text)?;
        let user_turn = NewTurn::new(
            Role::User,
            request.user_text.clone(),
            user_cost,
            format!("{request_key}:user"),
        );
        committed.push(self.commit(id, user_turn).await?);

        loop {
            match machine.state().clone() {
                TurnState::AwaitingModel => {
                    if request.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }

                    let response = self.call_model(id, &request.cancel).await?;
                    match parse_response(&response) {
                        ModelAction::FinalAnswer(answer) => {
                            let cost = message_cost(self.counter.as_ref(), &answer)?;
                            let turn = NewTurn::new(
                                Role::Assistant,
                                answer,
                                cost,
                                format!("{request_key}:assistant"),
                            );
                            let turn = self.commit(id, turn).await?;
                            let answer = turn.content.clone();
                            committed.push(turn);
                            let event = TurnEvent::ModelReplied(ModelAction::FinalAnswer(answer));
                            advance(machine, event)?;
                        }
                        action => {
                            let next = advance(machine, TurnEvent::ModelReplied(action))?;
                            if matches!(next, TurnState::Failed { .. }) {
                                return Err(Error::StepLimitExceeded {
                                    limit: machine.max_steps(),
                                });
                            }
                        }
                    }
                }
                TurnState::HandlingPluginCall { plugin, arguments } => {
                    if request.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }

                    let step = machine.steps();
                    let observation = self.run_plugin(id, step, &plugin, arguments).await;
                    let cost = message_cost(self.counter.as_ref(), &observation.content)?;
                    let turn = NewTurn::new(
                        Role::PluginObservation,
                        observation.content,
                        cost,
                        format!("{request_key}:step{step}:observation"),
                    )
                    .with_plugin_call(observation.record);
                    committed.push(self.commit(id, turn).await?);
                    advance(machine, TurnEvent::ObservationRecorded)?;
                }
                TurnState::Done { answer } => return Ok(answer),
                TurnState::Failed { cause } => {
                    return Err(Error::Internal(format!("turn failed: {cause:?}")));
                }
            }
        }
    }

    /// Assemble the prompt and get a model response, from cache if possible.
    async fn call_model(
        &self,
        id: &ConversationId,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, Error> {
        let window = self
            .history
            .read_window(id, Window::last_turns(self.config.history_window_turns))
            .await?;
        let descriptors = self.plugins.list();
        let prompt = assemble(
            self.counter.as_ref(),
            &self.config.system_instructions,
            &descriptors,
            &window,
            self.config.budget,
        )?;

        if prompt.turns_included == 0 {
            let needed = window.last().map_or(0, |turn| turn.token_cost);
            return Err(BudgetError::NoRoomForHistory {
                needed,
                remaining: prompt.remaining(),
            }
            .into());
        }
        debug!(
            conversation_id = %id,
            total_tokens = prompt.total_tokens,
            turns_included = prompt.turns_included,
            turns_dropped = prompt.turns_dropped,
            "Prompt assembled"
        );

        let fingerprint = match &self.cache {
            Some(_) => Some(Fingerprint::compute(
                &self.config.model,
                &prompt,
                &self.config.sampling,
            )?),
            None => None,
        };

        if let (Some(cache), Some(fp)) = (&self.cache, &fingerprint) {
            if let Some(response) = cache.get(fp) {
                debug!(conversation_id = %id, fingerprint = %fp, "Response cache hit");
                self.publish_model_called(id, &response.model, true, 0);
                return Ok(response);
            }
        }

        let request = prompt.to_model_request(
            self.config.model.clone(),
            descriptors,
            self.config.sampling.clone(),
        );
        let (response, attempts) =
            call_with_retry(self.provider.as_ref(), &request, &self.config.retry, cancel).await?;

        if let (Some(cache), Some(fp)) = (&self.cache, fingerprint) {
            cache.put(fp, response.clone(), self.config.cache_ttl);
        }
        self.publish_model_called(id, &response.model, false, attempts);
        Ok(response)
    }

    /// Invoke a plugin and describe the outcome for the model.
    async fn run_plugin(
        &self,
        id: &ConversationId,
        step: u32,
        plugin: &str,
        arguments: serde_json::Value,
    ) -> Observation {
        debug!(conversation_id = %id, step, plugin, "Invoking plugin");
        let start = Instant::now();
        let result = self.plugins.invoke(plugin, arguments.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.events.publish(DomainEvent::PluginInvoked {
            conversation_id: id.to_string(),
            plugin: plugin.to_string(),
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(output) => Observation {
                content: format!("{plugin} returned: {output}"),
                record: PluginCallRecord {
                    plugin: plugin.to_string(),
                    arguments,
                    result: output,
                    success: true,
                },
            },
            Err(e) => {
                let reason = self.failure_reason(&e);
                warn!(conversation_id = %id, step, plugin, "Plugin call failed: {reason}");
                Observation {
                    content: format!("{plugin} failed: {reason}"),
                    record: PluginCallRecord {
                        plugin: plugin.to_string(),
                        arguments,
                        result: reason,
                        success: false,
                    },
                }
            }
        }
    }

    fn failure_reason(&self, error: &PluginError) -> String {
        match error {
            PluginError::Unknown(_) => format!(
                "no such plugin; available plugins: {}",
                self.plugins.names().join(", ")
            ),
            PluginError::InvalidArguments { reason, .. } => format!("invalid arguments: {reason}"),
            PluginError::Execution { reason, .. } => reason.clone(),
            PluginError::Timeout { timeout_secs, .. } => {
                format!("timed out after {timeout_secs}s")
            }
        }
    }

    /// Append a turn, retrying storage failures with the same key.
    async fn commit(&self, id: &ConversationId, turn: NewTurn) -> Result<Turn, PersistenceError> {
        let mut attempt = 0u32;
        let committed = loop {
            match self.history.append(id, turn.clone()).await {
                Ok(committed) => break committed,
                Err(e) if attempt < self.config.append_retries => {
                    attempt += 1;
                    warn!(
                        conversation_id = %id,
                        key = %turn.idempotency_key,
                        attempt,
                        "History append failed: {e}; retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        debug!(conversation_id = %id, seq = committed.seq, role = %committed.role, "Turn committed");
        self.events.publish(DomainEvent::TurnCommitted {
            conversation_id: id.to_string(),
            role: committed.role,
            seq: committed.seq,
            timestamp: Utc::now(),
        });
        Ok(committed)
    }

    fn publish_model_called(&self, id: &ConversationId, model: &str, cached: bool, attempts: u32) {
        self.events.publish(DomainEvent::ModelCalled {
            conversation_id: id.to_string(),
            model: model.to_string(),
            cached,
            attempts,
            timestamp: Utc::now(),
        });
    }

    /// The lock serializing turns of one conversation.
    fn conversation_lock(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Drop locks nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}

struct Observation {
    content: String,
    record: PluginCallRecord,
}

fn advance(machine: &mut TurnMachine, event: TurnEvent) -> Result<&TurnState, Error> {
    machine
        .advance(event)
        .map_err(|e| Error::Internal(e.to_string()))
}
