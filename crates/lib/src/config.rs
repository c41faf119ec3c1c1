//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.wxoa/config.json`) and environment.
//! Account credentials live in a separate file (see [`crate::accounts`]) so the config can be
//! shared without secrets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Where account credentials are stored.
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Audit log sink.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Overrides for the built-in reply texts.
    #[serde(default)]
    pub replies: RepliesConfig,
}

/// Gateway bind and routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 5000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1"). Put a TLS-terminating proxy in front for public exposure.
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Account served on the bare `/wechat` path. Per-account paths `/wechat/{name}` always work.
    #[serde(default)]
    pub default_account: Option<String>,

    /// Public base URL the provider calls (e.g. "https://example.com"); only used for logging the callback URL.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_gateway_port() -> u16 {
    5000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            default_account: None,
            public_url: None,
        }
    }
}

/// Account file location. Relative paths are resolved against the config file's parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsConfig {
    /// Overridden by WXOA_ACCOUNTS_PATH env. Default: `accounts.json` next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Audit log location. Relative paths are resolved against the config file's parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    /// Default: `audit.log` next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Reply text overrides. Blank values fall back to the built-in text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepliesConfig {
    pub welcome: Option<String>,
    pub greeting: Option<String>,
    pub help: Option<String>,
    pub image_ack: Option<String>,
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WXOA_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".wxoa").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn resolve_relative(config_path: &Path, configured: Option<&PathBuf>, default_name: &str) -> PathBuf {
    match configured {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent(config_path).join(p)
            }
        }
        _ => config_parent(config_path).join(default_name),
    }
}

/// Resolve the accounts file: env WXOA_ACCOUNTS_PATH overrides config, which overrides the default.
pub fn resolve_accounts_path(config: &Config, config_path: &Path) -> PathBuf {
    std::env::var("WXOA_ACCOUNTS_PATH")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| resolve_relative(config_path, config.accounts.path.as_ref(), "accounts.json"))
}

/// Resolve the audit log file.
pub fn resolve_audit_path(config: &Config, config_path: &Path) -> PathBuf {
    resolve_relative(config_path, config.audit.path.as_ref(), "audit.log")
}

/// Load config from the default path (or WXOA_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving sibling files).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
