//! `botloom plugins` — List enabled plugins and their argument schemas.

use crate::setup;
use botloom_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = setup::plugin_registry(&config)?;

    if registry.is_empty() {
        println!("No plugins enabled.");
        return Ok(());
    }

    println!("Enabled plugins ({}):\n", registry.len());
    for descriptor in registry.list() {
        println!("  {}", descriptor.name);
        println!("    {}", descriptor.usage);
        println!("    arguments: {}", serde_json::to_string(&descriptor.schema)?);
        println!();
    }
    Ok(())
}
