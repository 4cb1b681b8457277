//! Subcommand handlers.

use std::path::Path;

/// Write a default `.cosci/config.toml`, leaving an existing file untouched.
pub fn config_init(workspace: &Path) -> anyhow::Result<()> {
    let config_dir = workspace.join(".cosci");
    std::fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        println!(
            "Configuration file already exists at: {}",
            config_path.display()
        );
        return Ok(());
    }

    let toml_str = cosci_core::CosciConfig::default().to_toml()?;
    std::fs::write(&config_path, toml_str)?;
    println!("Created configuration file: {}", config_path.display());
    Ok(())
}

pub fn config_show(workspace: &Path) -> anyhow::Result<()> {
    let config = cosci_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    println!("{}", config.to_toml()?);
    Ok(())
}
