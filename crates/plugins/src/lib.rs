//! Built-in plugin implementations for botloom.
//!
//! Plugins give the bot the ability to reach outside the conversation:
//! do exact arithmetic, look up reference articles, search, and fetch pages.

pub mod calculator;
pub mod encyclopedia;
pub mod page_fetch;
pub mod web_search;

use botloom_core::plugin::{Plugin, PluginRegistry};
use std::sync::Arc;
use std::time::Duration;

pub use calculator::CalculatorPlugin;
pub use encyclopedia::EncyclopediaPlugin;
pub use page_fetch::PageFetchPlugin;
pub use web_search::WebSearchPlugin;

/// Names of every built-in plugin, in default registration order.
pub const BUILTIN_PLUGINS: &[&str] = &["calculator", "encyclopedia", "web_search", "page_fetch"];

/// Construct a built-in plugin by name.
pub fn builtin(name: &str) -> Option<Arc<dyn Plugin>> {
    let plugin: Arc<dyn Plugin> = match name {
        "calculator" => Arc::new(CalculatorPlugin),
        "encyclopedia" => Arc::new(EncyclopediaPlugin::new()),
        "web_search" => Arc::new(WebSearchPlugin::new()),
        "page_fetch" => Arc::new(PageFetchPlugin::new()),
        _ => return None,
    };
    Some(plugin)
}

/// Build a registry from configured plugin names, in the order given.
pub fn registry_from_names(
    names: &[String],
    invoke_timeout: Duration,
) -> botloom_core::Result<PluginRegistry> {
    let mut builder = PluginRegistry::builder().invoke_timeout(invoke_timeout);
    for name in names {
        let plugin = builtin(name).ok_or_else(|| botloom_core::Error::Config {
            message: format!(
                "unknown plugin '{name}' (available: {})",
                BUILTIN_PLUGINS.join(", ")
            ),
        })?;
        builder = builder.register(plugin);
    }
    Ok(builder.build())
}

/// A registry with all built-in plugins.
pub fn default_registry() -> PluginRegistry {
    let mut builder = PluginRegistry::builder();
    for plugin in BUILTIN_PLUGINS.iter().filter_map(|name| builtin(name)) {
        builder = builder.register(plugin);
    }
    builder.build()
}
