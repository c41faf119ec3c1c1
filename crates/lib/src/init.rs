//! Initialize the configuration directory: create ~/.wxoa, a default config, and an empty account store.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Writes the account store (default `accounts.json`) with `{}` if missing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (cfg, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let accounts = config::resolve_accounts_path(&cfg, config_path);
    if !accounts.exists() {
        if let Some(parent) = accounts.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating account store directory {}", parent.display()))?;
        }
        std::fs::write(&accounts, b"{}")
            .with_context(|| format!("writing account store {}", accounts.display()))?;
        log::info!("created account store at {}", accounts.display());
    } else {
        log::debug!("account store already exists at {}, skipping", accounts.display());
    }

    Ok(config_dir.to_path_buf())
}
