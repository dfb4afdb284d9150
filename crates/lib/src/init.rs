//! Initialize the configuration directory: create ~/.gembot and a default config file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Create the config directory and default config if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with every default spelled out if missing. Secrets are left unset;
///   supply them via TELEGRAM_BOT_TOKEN and API_KEY.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    #[test]
    fn init_writes_loadable_default_config() {
        let dir = std::env::temp_dir().join(format!("gembot-init-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let created = init_config_dir(&path).unwrap();
        assert_eq!(created, dir);
        let (config, _) = load_config(Some(path.clone())).unwrap();
        assert_eq!(config.gateway.port, 5000);
        assert_eq!(config.agents.model, "gemini-1.5-flash");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_keeps_existing_config() {
        let dir = std::env::temp_dir().join(format!("gembot-init-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"gateway":{"port":7000}}"#).unwrap();
        init_config_dir(&path).unwrap();
        let (config, _) = load_config(Some(path)).unwrap();
        assert_eq!(config.gateway.port, 7000);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
