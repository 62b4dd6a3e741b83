//! End-to-end tests for the orchestration loop.
//!
//! A scripted provider stands in for the model; plugins and history are
//! the real implementations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use botloom_agent::{
    Orchestrator, OrchestratorConfig, PromptBudget, ResponseCache, RetryPolicy, TurnRequest,
};
use botloom_core::error::{BudgetError, Error, PersistenceError, ProviderError};
use botloom_core::event::DomainEvent;
use botloom_core::history::{HistoryStore, Window};
use botloom_core::plugin::{Plugin, PluginFailure, PluginRegistry};
use botloom_core::provider::{ModelRequest, ModelResponse, Provider, RequestedPluginCall};
use botloom_core::turn::{Conversation, ConversationId, NewTurn, Role, Turn};
use botloom_history::InMemoryHistory;
use botloom_plugins::{CalculatorPlugin, EncyclopediaPlugin};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

type Reply = Result<ModelResponse, ProviderError>;

/// Returns scripted replies in order, then repeats `fallback` if set.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn always(reply: Reply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::new(vec![])
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ModelRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(reply) => reply,
            None => panic!("ScriptedProvider exhausted after {} call(s)", self.calls()),
        }
    }
}

fn text(content: &str) -> Reply {
    Ok(ModelResponse::text("mock", content))
}

fn native_call(name: &str, arguments: serde_json::Value) -> Reply {
    Ok(ModelResponse {
        content: String::new(),
        plugin_calls: vec![RequestedPluginCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments,
        }],
        model: "mock".into(),
        usage: None,
    })
}

// ── Test plugins ─────────────────────────────────────────────────────────

struct BrokenPlugin;

#[async_trait]
impl Plugin for BrokenPlugin {
    fn name(&self) -> &str {
        "broken"
    }
    fn usage(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, PluginFailure> {
        Err("database connection refused".into())
    }
}

/// Cancels the turn's token when invoked, then succeeds.
struct CancellingPlugin(CancellationToken);

#[async_trait]
impl Plugin for CancellingPlugin {
    fn name(&self) -> &str {
        "stop"
    }
    fn usage(&self) -> &str {
        "Requests cancellation"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, PluginFailure> {
        self.0.cancel();
        Ok("stopping".into())
    }
}

/// Fails the first `failures` appends, then delegates.
struct FlakyHistory {
    inner: InMemoryHistory,
    failures: Mutex<u32>,
}

#[async_trait]
impl HistoryStore for FlakyHistory {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn append(&self, id: &ConversationId, turn: NewTurn) -> Result<Turn, PersistenceError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PersistenceError::Storage("disk busy".into()));
            }
        }
        self.inner.append(id, turn).await
    }

    async fn read_window(&self, id: &ConversationId, window: Window) -> Result<Vec<Turn>, PersistenceError> {
        self.inner.read_window(id, window).await
    }

    async fn conversation(&self, id: &ConversationId) -> Result<Option<Conversation>, PersistenceError> {
        self.inner.conversation(id).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationId>, PersistenceError> {
        self.inner.list_conversations().await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn registry(plugins: Vec<Arc<dyn Plugin>>) -> Arc<PluginRegistry> {
    let mut builder = PluginRegistry::builder();
    for plugin in plugins {
        builder = builder.register(plugin);
    }
    Arc::new(builder.build())
}

fn standard_plugins() -> Arc<PluginRegistry> {
    registry(vec![
        Arc::new(CalculatorPlugin),
        Arc::new(EncyclopediaPlugin::new()),
        Arc::new(BrokenPlugin),
    ])
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_steps: 4,
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            call_timeout: Duration::from_secs(5),
        },
        ..OrchestratorConfig::default()
    }
}

fn orchestrator(
    provider: Arc<ScriptedProvider>,
    plugins: Arc<PluginRegistry>,
    history: Arc<InMemoryHistory>,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(provider, plugins, history, config)
}

fn roles(turns: &[Turn]) -> Vec<Role> {
    turns.iter().map(|t| t.role).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_plugins_then_final_answer() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        text("I need to compute.\nAction: calculator\nAction Input: {\"expression\": \"2+2\"}"),
        native_call("encyclopedia", json!({"topic": "3rd president"})),
        text("Final Answer: 2+2 is 4, and the 3rd president was Thomas Jefferson."),
    ]));
    let history = Arc::new(InMemoryHistory::new());
    let orch = orchestrator(provider.clone(), standard_plugins(), history.clone(), config());
    let mut events = orch.events().subscribe();
    let id = ConversationId::from("c1");

    let outcome = orch
        .start_turn(&id, "What's 2+2 and who is the 3rd president?")
        .await
        .unwrap();

    assert_eq!(outcome.answer, "2+2 is 4, and the 3rd president was Thomas Jefferson.");
    assert_eq!(outcome.steps, 2);
    assert_eq!(
        roles(&outcome.committed),
        vec![Role::User, Role::PluginObservation, Role::PluginObservation, Role::Assistant]
    );
    assert_eq!(outcome.committed[1].content, "calculator returned: 4");
    assert!(outcome.committed[2].content.starts_with("encyclopedia returned: Thomas Jefferson:"));
    let record = outcome.committed[1].plugin_call.as_ref().unwrap();
    assert!(record.success);
    assert_eq!(record.result, "4");

    // The last prompt carries both observations, in order
    let last = provider.request(2);
    let contents: Vec<_> = last.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1], "calculator returned: 4");
    assert!(last.system.contains("- calculator:"));

    let stored = history.read_window(&id, Window::all()).await.unwrap();
    assert_eq!(stored, outcome.committed);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first().map(|e| e.as_ref()), Some(DomainEvent::TurnStarted { .. })));
    assert!(matches!(
        seen.last().map(|e| e.as_ref()),
        Some(DomainEvent::TurnCompleted { steps: 2, .. })
    ));
    let plugin_events = seen
        .iter()
        .filter(|e| matches!(e.as_ref(), DomainEvent::PluginInvoked { success: true, .. }))
        .count();
    assert_eq!(plugin_events, 2);
}

#[tokio::test]
async fn plugin_failure_is_recoverable() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        native_call("broken", json!({})),
        text("Sorry, the lookup failed."),
    ]));
    let orch = orchestrator(
        provider,
        standard_plugins(),
        Arc::new(InMemoryHistory::new()),
        config(),
    );

    let outcome = orch.start_turn(&ConversationId::from("c1"), "Look it up").await.unwrap();
    assert_eq!(outcome.answer, "Sorry, the lookup failed.");
    let observation = &outcome.committed[1];
    assert_eq!(observation.role, Role::PluginObservation);
    assert_eq!(observation.content, "broken failed: database connection refused");
    assert!(!observation.plugin_call.as_ref().unwrap().success);
}

#[tokio::test]
async fn unknown_plugin_and_bad_arguments_become_observations() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        native_call("shell", json!({"cmd": "ls"})),
        text("Action: calculator\nAction Input: 2+2"),
        text("I could not compute it."),
    ]));
    let orch = orchestrator(
        provider,
        standard_plugins(),
        Arc::new(InMemoryHistory::new()),
        config(),
    );

    let outcome = orch.start_turn(&ConversationId::from("c1"), "Compute").await.unwrap();
    assert_eq!(outcome.steps, 2);
    assert!(outcome.committed[1].content.starts_with("shell failed: no such plugin"));
    assert!(outcome.committed[1].content.contains("calculator"));
    assert!(outcome.committed[2].content.starts_with("calculator failed: invalid arguments"));
}

#[tokio::test]
async fn step_limit_keeps_partial_history() {
    let provider = Arc::new(ScriptedProvider::always(native_call(
        "calculator",
        json!({"expression": "1+1"}),
    )));
    let history = Arc::new(InMemoryHistory::new());
    let orch = orchestrator(
        provider.clone(),
        standard_plugins(),
        history.clone(),
        OrchestratorConfig {
            max_steps: 2,
            ..config()
        },
    );
    let id = ConversationId::from("c1");

    let failure = orch.start_turn(&id, "Loop forever").await.unwrap_err();
    assert!(matches!(failure.error, Error::StepLimitExceeded { limit: 2 }));
    assert_eq!(
        roles(&failure.committed),
        vec![Role::User, Role::PluginObservation, Role::PluginObservation]
    );
    assert_eq!(provider.calls(), 3);

    let stored = history.read_window(&id, Window::all()).await.unwrap();
    assert_eq!(stored, failure.committed);
}

#[tokio::test]
async fn reserved_budget_overflow_fails_without_calling_the_model() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orch = orchestrator(
        provider.clone(),
        standard_plugins(),
        Arc::new(InMemoryHistory::new()),
        OrchestratorConfig {
            system_instructions: "Be thorough. ".repeat(200),
            budget: PromptBudget::new(256),
            ..config()
        },
    );

    let failure = orch.start_turn(&ConversationId::from("c1"), "Hi").await.unwrap_err();
    assert!(matches!(
        failure.error,
        Error::BudgetExceeded(BudgetError::ReservedExceedsMax { max: 256, .. })
    ));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn oversized_message_leaves_no_room_for_history() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orch = orchestrator(
        provider.clone(),
        registry(vec![]),
        Arc::new(InMemoryHistory::new()),
        OrchestratorConfig {
            budget: PromptBudget::new(100),
            ..config()
        },
    );

    let failure = orch
        .start_turn(&ConversationId::from("c1"), &"word ".repeat(200))
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        Error::BudgetExceeded(BudgetError::NoRoomForHistory { .. })
    ));
    assert_eq!(roles(&failure.committed), vec![Role::User]);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn identical_prompts_hit_the_cache() {
    let provider = Arc::new(ScriptedProvider::new(vec![text("Hello!")]));
    let cache = Arc::new(ResponseCache::new(16));
    let orch = orchestrator(
        provider.clone(),
        standard_plugins(),
        Arc::new(InMemoryHistory::new()),
        config(),
    )
    .with_cache(cache.clone());
    let mut events = orch.events().subscribe();

    let first = orch.start_turn(&ConversationId::from("a"), "Hi").await.unwrap();
    let second = orch.start_turn(&ConversationId::from("b"), "Hi").await.unwrap();

    assert_eq!(first.answer, "Hello!");
    assert_eq!(second.answer, "Hello!");
    assert_eq!(provider.calls(), 1);
    assert_eq!(cache.stats().hits, 1);

    let mut cached_flags = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::ModelCalled { cached, attempts, .. } = event.as_ref() {
            cached_flags.push((*cached, *attempts));
        }
    }
    assert_eq!(cached_flags, vec![(false, 1), (true, 0)]);
}

#[tokio::test]
async fn replaying_a_request_key_does_not_duplicate_turns() {
    let provider = Arc::new(ScriptedProvider::new(vec![text("first"), text("second")]));
    let history = Arc::new(InMemoryHistory::new());
    let orch = orchestrator(provider, standard_plugins(), history.clone(), config());
    let id = ConversationId::from("c1");
    let request = TurnRequest::new(id.clone(), "Hi").with_request_key("req-42");

    let first = orch.run_turn(request.clone()).await.unwrap();
    let replay = orch.run_turn(request).await.unwrap();

    assert_eq!(first.answer, "first");
    assert_eq!(replay.answer, "first");
    let stored = history.read_window(&id, Window::all()).await.unwrap();
    assert_eq!(roles(&stored), vec![Role::User, Role::Assistant]);
    assert_eq!(stored[0].idempotency_key, "req-42:user");
    assert_eq!(stored[1].idempotency_key, "req-42:assistant");
}

#[tokio::test]
async fn cancelled_before_start_commits_nothing() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orch = orchestrator(
        provider,
        standard_plugins(),
        Arc::new(InMemoryHistory::new()),
        config(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = orch
        .run_turn(TurnRequest::new(ConversationId::from("c1"), "Hi").with_cancel(cancel))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, Error::Cancelled));
    assert!(failure.committed.is_empty());
}

#[tokio::test]
async fn cancellation_between_steps_keeps_observations() {
    let cancel = CancellationToken::new();
    let provider = Arc::new(ScriptedProvider::new(vec![native_call("stop", json!({}))]));
    let orch = orchestrator(
        provider.clone(),
        registry(vec![Arc::new(CancellingPlugin(cancel.clone()))]),
        Arc::new(InMemoryHistory::new()),
        config(),
    );

    let failure = orch
        .run_turn(TurnRequest::new(ConversationId::from("c1"), "Stop").with_cancel(cancel))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, Error::Cancelled));
    assert_eq!(roles(&failure.committed), vec![Role::User, Role::PluginObservation]);
    assert_eq!(failure.committed[1].content, "stop returned: stopping");
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn model_unavailable_after_retries() {
    let provider = Arc::new(ScriptedProvider::always(Err(ProviderError::Network(
        "connection reset".into(),
    ))));
    let orch = orchestrator(
        provider.clone(),
        standard_plugins(),
        Arc::new(InMemoryHistory::new()),
        config(),
    );

    let failure = orch.start_turn(&ConversationId::from("c1"), "Hi").await.unwrap_err();
    match &failure.error {
        Error::ModelUnavailable { attempts, last_error } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(last_error, ProviderError::Network(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provider.calls(), 3);
    assert_eq!(roles(&failure.committed), vec![Role::User]);
}

#[tokio::test]
async fn failed_appends_are_retried_with_the_same_key() {
    let provider = Arc::new(ScriptedProvider::new(vec![text("ok")]));
    let history = Arc::new(FlakyHistory {
        inner: InMemoryHistory::new(),
        failures: Mutex::new(2),
    });
    let orch = Orchestrator::new(provider, standard_plugins(), history.clone(), config());
    let id = ConversationId::from("c1");

    let outcome = orch.start_turn(&id, "Hi").await.unwrap();
    assert_eq!(outcome.committed.len(), 2);
    assert_eq!(history.read_window(&id, Window::all()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn persistent_storage_failure_fails_the_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let history = Arc::new(FlakyHistory {
        inner: InMemoryHistory::new(),
        failures: Mutex::new(10),
    });
    let orch = Orchestrator::new(provider.clone(), standard_plugins(), history, config());

    let failure = orch.start_turn(&ConversationId::from("c1"), "Hi").await.unwrap_err();
    assert!(matches!(failure.error, Error::Persistence(_)));
    assert!(failure.committed.is_empty());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn turns_in_one_conversation_are_serialized() {
    let provider = Arc::new(ScriptedProvider::always(text("ok")));
    let history = Arc::new(InMemoryHistory::new());
    let orch = Arc::new(orchestrator(provider, standard_plugins(), history.clone(), config()));
    let id = ConversationId::from("shared");

    let mut handles = Vec::new();
    for i in 0..4 {
        let orch = Arc::clone(&orch);
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            orch.start_turn(&id, &format!("message {i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = history.read_window(&id, Window::all()).await.unwrap();
    assert_eq!(stored.len(), 8);
    for pair in stored.chunks(2) {
        assert_eq!(roles(pair), vec![Role::User, Role::Assistant]);
    }
}
