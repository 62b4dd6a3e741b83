//! `botloom init` — Write the default configuration.

use botloom_config::AppConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("botloom — setup");
    println!("===============\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() && !force {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force to overwrite.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Wrote config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set BOTLOOM_API_KEY (or api_key in config.toml)");
    println!("      Local OpenAI-compatible servers on localhost need no key.");
    println!("   2. Run: botloom chat -m \"What's 2+2?\"\n");
    Ok(())
}
