//! Build the runtime pieces from configuration.

use botloom_agent::{HeuristicCounter, Orchestrator, OrchestratorConfig, ResponseCache, TokenCounter};
use botloom_config::{AppConfig, HistoryBackendKind, HistoryConfig, TokenizerConfig, TokenizerKind};
use botloom_core::history::HistoryStore;
use botloom_core::plugin::PluginRegistry;
use botloom_history::{FileHistory, InMemoryHistory};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

type BoxError = Box<dyn std::error::Error>;

/// Open the configured history backend, creating its directory if needed.
pub async fn open_history(config: &HistoryConfig) -> Result<Arc<dyn HistoryStore>, BoxError> {
    if config.backend == HistoryBackendKind::Memory {
        return Ok(Arc::new(InMemoryHistory::new()));
    }

    let path = config.resolved_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store: Arc<dyn HistoryStore> = match config.backend {
        HistoryBackendKind::File => Arc::new(FileHistory::open(&path)?),
        #[cfg(feature = "sqlite")]
        HistoryBackendKind::Sqlite => {
            Arc::new(botloom_history::SqliteHistory::new(&path.to_string_lossy()).await?)
        }
        #[cfg(not(feature = "sqlite"))]
        HistoryBackendKind::Sqlite => {
            return Err("this build has no SQLite support; rebuild with --features sqlite".into());
        }
        HistoryBackendKind::Memory => Arc::new(InMemoryHistory::new()),
    };
    info!(backend = store.name(), path = %path.display(), "History opened");
    Ok(store)
}

/// The configured token counter.
pub fn token_counter(config: &TokenizerConfig) -> Result<Arc<dyn TokenCounter>, BoxError> {
    match config.kind {
        TokenizerKind::Heuristic => Ok(Arc::new(HeuristicCounter)),
        #[cfg(feature = "hf-tokenizer")]
        TokenizerKind::Huggingface => {
            let path = config
                .path
                .as_ref()
                .ok_or("tokenizer.path is required for the huggingface tokenizer")?;
            let version = config
                .version
                .clone()
                .unwrap_or_else(|| path.display().to_string());
            Ok(Arc::new(botloom_agent::HfTokenizerCounter::from_file(path, version)?))
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        TokenizerKind::Huggingface => {
            Err("this build has no Hugging Face tokenizer; rebuild with --features hf-tokenizer".into())
        }
    }
}

/// The enabled plugins, in configured order.
///
/// An empty `plugins.enabled` means every built-in plugin, unless
/// `plugins.load_defaults` (or test mode) turns that off.
pub fn plugin_registry(config: &AppConfig) -> Result<Arc<PluginRegistry>, BoxError> {
    let names: Vec<String> = if config.plugins.uses_defaults() {
        botloom_plugins::BUILTIN_PLUGINS
            .iter()
            .map(|name| name.to_string())
            .collect()
    } else {
        config.plugins.enabled.clone()
    };
    let registry = botloom_plugins::registry_from_names(
        &names,
        Duration::from_secs(config.agent.plugin_timeout_secs),
    )?;
    Ok(Arc::new(registry))
}

/// Wire provider, plugins, history, tokenizer and cache into an orchestrator.
pub async fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator, BoxError> {
    let provider = botloom_providers::build_from_config(config)?;
    let plugins = plugin_registry(config)?;
    let history = open_history(&config.history).await?;
    let counter = token_counter(&config.tokenizer)?;

    let mut orchestrator = Orchestrator::new(
        provider,
        plugins,
        history,
        OrchestratorConfig::from_app_config(config),
    )
    .with_token_counter(counter);

    if config.cache.enabled {
        orchestrator = orchestrator.with_cache(Arc::new(ResponseCache::new(config.cache.capacity)));
    }
    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use botloom_core::turn::{ConversationId, NewTurn, Role};

    #[tokio::test]
    async fn memory_backend_needs_no_path() {
        let store = open_history(&HistoryConfig {
            backend: HistoryBackendKind::Memory,
            path: None,
        })
        .await
        .unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn file_backend_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.jsonl");
        let config = HistoryConfig {
            backend: HistoryBackendKind::File,
            path: Some(path.clone()),
        };

        let store = open_history(&config).await.unwrap();
        assert_eq!(store.name(), "file");
        store
            .append(&ConversationId::from("c1"), NewTurn::new(Role::User, "hi", 5, "k1"))
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_backend_opens() {
        let dir = tempfile::tempdir().unwrap();
        let config = HistoryConfig {
            backend: HistoryBackendKind::Sqlite,
            path: Some(dir.path().join("history.db")),
        };
        let store = open_history(&config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
    }

    #[test]
    fn heuristic_is_the_default_counter() {
        let counter = token_counter(&TokenizerConfig::default()).unwrap();
        assert_eq!(counter.version(), HeuristicCounter::VERSION);
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let mut config = AppConfig::default();
        config.plugins.enabled = vec!["calculator".into(), "teleport".into()];
        let err = plugin_registry(&config).err().unwrap();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn empty_plugin_list_loads_builtins() {
        let registry = plugin_registry(&AppConfig::default()).unwrap();
        assert_eq!(registry.names(), botloom_plugins::BUILTIN_PLUGINS.to_vec());
    }

    #[test]
    fn test_mode_loads_no_default_plugins() {
        let mut config = AppConfig {
            test_mode: true,
            ..AppConfig::default()
        };
        config.apply_test_mode();
        assert!(plugin_registry(&config).unwrap().is_empty());

        config.plugins.enabled = vec!["calculator".into()];
        assert_eq!(plugin_registry(&config).unwrap().names(), vec!["calculator"]);
    }

    #[tokio::test]
    async fn orchestrator_builds_for_local_endpoint() {
        let config = AppConfig {
            api_url: "http://localhost:11434/v1".into(),
            history: HistoryConfig {
                backend: HistoryBackendKind::Memory,
                path: None,
            },
            ..AppConfig::default()
        };
        let orchestrator = build_orchestrator(&config).await.unwrap();
        assert_eq!(orchestrator.plugins().len(), 4);
        assert!(orchestrator.cache().is_some());
    }
}
