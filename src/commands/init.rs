use anyhow::{Context, Result};
use dumpsync::config::Config;
use std::path::Path;

pub fn init_config(path: &Path) -> Result<()> {
    let config_path = path.join("dumpsync.toml");
    if config_path.exists() {
        anyhow::bail!("Config file already exists: {}", config_path.display());
    }

    let rendered = Config::default().to_toml()?;
    let content = format!(
        "# dumpsync configuration\n\
         #\n\
         # [filter] takes optional allow-lists:\n\
         #   languages = [\"en\", \"de\"]\n\
         #   sites = [\"enwiki\"]\n\
         #   properties = [\"P31\", \"P279\"]\n\
         # [processing] takes an optional timeout_secs.\n\n{}",
        rendered
    );

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    println!("Created configuration file: {}", config_path.display());
    println!("Dumps will be cached under: {}", Config::default().dumps.download_root.display());
    Ok(())
}
