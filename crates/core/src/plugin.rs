//! Plugin trait and registry — the bot's bounded set of capabilities.
//!
//! Plugins are what let the bot reach outside the conversation: evaluate
//! arithmetic, look something up, search the web, fetch a page. The
//! registry is built once and is read-only afterwards; the orchestrator
//! shares it across conversations behind an `Arc`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use crate::error::PluginError;
use crate::schema;

/// Error type plugin implementations return. The registry labels it.
pub type PluginFailure = Box<dyn std::error::Error + Send + Sync>;

/// What the model is told about a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name (e.g., "calculator")
    pub name: String,

    /// Natural-language usage text
    pub usage: String,

    /// JSON Schema for the argument object
    pub schema: serde_json::Value,
}

/// The core Plugin trait.
///
/// Implementations never validate their arguments against the schema
/// themselves; the registry does that before calling `invoke`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The unique name of this plugin.
    fn name(&self) -> &str;

    /// A description of what this plugin does (sent to the model).
    fn usage(&self) -> &str;

    /// JSON Schema describing this plugin's arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the plugin and return observation text.
    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, PluginFailure>;

    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            name: self.name().to_string(),
            usage: self.usage().to_string(),
            schema: self.parameters_schema(),
        }
    }
}

struct Registered {
    descriptor: PluginDescriptor,
    plugin: Arc<dyn Plugin>,
}

/// An immutable set of plugins, in registration order.
pub struct PluginRegistry {
    entries: Vec<Registered>,
    index: HashMap<String, usize>,
    invoke_timeout: Duration,
}

/// Collects plugins before the registry is frozen.
pub struct PluginRegistryBuilder {
    entries: Vec<Registered>,
    index: HashMap<String, usize>,
    invoke_timeout: Duration,
}

impl PluginRegistryBuilder {
    /// Register a plugin. A later registration with the same name replaces
    /// the earlier one in place.
    pub fn register(mut self, plugin: Arc<dyn Plugin>) -> Self {
        let descriptor = plugin.descriptor();
        let entry = Registered { descriptor, plugin };
        match self.index.get(&entry.descriptor.name) {
            Some(&pos) => {
                warn!(plugin = %entry.descriptor.name, "Replacing previously registered plugin");
                self.entries[pos] = entry;
            }
            None => {
                self.index.insert(entry.descriptor.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        self
    }

    /// Per-invocation timeout (default 30s).
    pub fn invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            entries: self.entries,
            index: self.index,
            invoke_timeout: self.invoke_timeout,
        }
    }
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder {
            entries: Vec::new(),
            index: HashMap::new(),
            invoke_timeout: Duration::from_secs(30),
        }
    }

    /// A registry with no plugins.
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// All descriptors, in registration order.
    pub fn list(&self) -> Vec<PluginDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Result<&PluginDescriptor, PluginError> {
        self.index
            .get(name)
            .map(|&pos| &self.entries[pos].descriptor)
            .ok_or_else(|| PluginError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate the arguments against the plugin's schema without running it.
    pub fn validate(&self, name: &str, arguments: &serde_json::Value) -> Result<(), PluginError> {
        let descriptor = self.get(name)?;
        schema::validate(&descriptor.schema, arguments).map_err(|reason| {
            PluginError::InvalidArguments {
                plugin: name.to_string(),
                reason,
            }
        })
    }

    /// Validate, then invoke the plugin on its own task under the timeout.
    ///
    /// Plugin errors, panics and timeouts all come back as a labeled
    /// [`PluginError`].
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, PluginError> {
        self.validate(name, &arguments)?;
        let plugin = match self.index.get(name) {
            Some(&pos) => Arc::clone(&self.entries[pos].plugin),
            None => return Err(PluginError::Unknown(name.to_string())),
        };

        debug!(plugin = %name, "Invoking plugin");
        let handle = tokio::spawn(async move { plugin.invoke(arguments).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.invoke_timeout, handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(PluginError::Execution {
                plugin: name.to_string(),
                reason: e.to_string(),
            }),
            Ok(Err(join_err)) => Err(PluginError::Execution {
                plugin: name.to_string(),
                reason: if join_err.is_panic() {
                    "plugin panicked".into()
                } else {
                    "plugin task was cancelled".into()
                },
            }),
            Err(_) => {
                abort.abort();
                Err(PluginError::Timeout {
                    plugin: name.to_string(),
                    timeout_secs: self.invoke_timeout.as_secs(),
                })
            }
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test plugin for unit tests.
    struct EchoPlugin;

    #[async_trait]
    impl Plugin for EchoPlugin {
        fn name(&self) -> &str { "echo" }
        fn usage(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn invoke(&self, arguments: serde_json::Value) -> Result<String, PluginFailure> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct BrokenPlugin;

    #[async_trait]
    impl Plugin for BrokenPlugin {
        fn name(&self) -> &str { "broken" }
        fn usage(&self) -> &str { "Always fails" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, PluginFailure> {
            Err("backend exploded".into())
        }
    }

    struct PanickyPlugin;

    #[async_trait]
    impl Plugin for PanickyPlugin {
        fn name(&self) -> &str { "panicky" }
        fn usage(&self) -> &str { "Panics" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, PluginFailure> {
            panic!("index out of bounds");
        }
    }

    struct SlowPlugin;

    #[async_trait]
    impl Plugin for SlowPlugin {
        fn name(&self) -> &str { "slow" }
        fn usage(&self) -> &str { "Never finishes in time" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, PluginFailure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::builder()
            .register(Arc::new(EchoPlugin))
            .register(Arc::new(BrokenPlugin))
            .register(Arc::new(PanickyPlugin))
            .register(Arc::new(SlowPlugin))
            .invoke_timeout(Duration::from_secs(5))
            .build()
    }

    #[test]
    fn list_keeps_registration_order() {
        let names = registry().names().into_iter().map(String::from).collect::<Vec<_>>();
        assert_eq!(names, vec!["echo", "broken", "panicky", "slow"]);
    }

    #[test]
    fn replacing_keeps_position() {
        let registry = PluginRegistry::builder()
            .register(Arc::new(EchoPlugin))
            .register(Arc::new(BrokenPlugin))
            .register(Arc::new(EchoPlugin))
            .build();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["echo", "broken"]);
    }

    #[test]
    fn get_unknown_plugin() {
        let err = registry().get("nonexistent").unwrap_err();
        assert!(matches!(err, PluginError::Unknown(name) if name == "nonexistent"));
    }

    #[tokio::test]
    async fn invoke_echo() {
        let out = registry()
            .invoke("echo", serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn invoke_rejects_bad_arguments() {
        let err = registry()
            .invoke("echo", serde_json::json!({"text": 42}))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidArguments { ref plugin, .. } if plugin == "echo"));
    }

    #[tokio::test]
    async fn invoke_wraps_plugin_error() {
        let err = registry().invoke("broken", serde_json::json!({})).await.unwrap_err();
        match err {
            PluginError::Execution { plugin, reason } => {
                assert_eq!(plugin, "broken");
                assert!(reason.contains("backend exploded"));
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invoke_contains_panics() {
        let err = registry().invoke("panicky", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, PluginError::Execution { ref reason, .. } if reason.contains("panicked")));
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_times_out() {
        let err = registry().invoke("slow", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, PluginError::Timeout { timeout_secs: 5, .. }));
    }

    #[tokio::test]
    async fn invoke_unknown_plugin() {
        let err = registry().invoke("missing", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, PluginError::Unknown(_)));
    }
}
