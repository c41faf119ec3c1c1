//! Account store: named official-account credentials (app id, secret, webhook token).
//!
//! The gateway only reads through [`AccountStore::lookup`]; the CLI binds and removes
//! accounts on a [`FileAccountStore`], which persists a JSON object keyed by account name:
//! `{ "<name>": { "appid": "...", "secret": "...", "token": "..." } }`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// One named integration's credential set.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub app_id: String,
    pub app_secret: String,
    /// Webhook token shared with the provider; signatures cannot be checked without it.
    pub token: Option<String>,
}

impl Account {
    /// Secret with all but the last 8 characters replaced by `*`.
    pub fn masked_secret(&self) -> String {
        mask(&self.app_secret)
    }

    /// Token trimmed, or "" when unset.
    pub fn token_str(&self) -> &str {
        self.token.as_deref().map(str::trim).unwrap_or("")
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("app_id", &self.app_id)
            .field("app_secret", &self.masked_secret())
            .field("token", &self.token.as_ref().map(|t| mask(t)))
            .finish()
    }
}

fn mask(s: &str) -> String {
    let n = s.chars().count();
    let keep = n.min(8);
    let tail: String = s.chars().skip(n - keep).collect();
    format!("{}{}", "*".repeat(n - keep), tail)
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("account store {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing account store {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read access to account credentials, shared across gateway requests.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Account, AccountError>;

    /// Number of accounts currently known.
    async fn count(&self) -> usize;

    /// Whether the backing storage can be reached (used by the liveness endpoint).
    async fn is_available(&self) -> bool {
        true
    }
}

/// In-memory store; nothing is persisted.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<BTreeMap<String, Account>>,
}

impl MemoryAccountStore {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: RwLock::new(accounts.into_iter().map(|a| (a.name.clone(), a)).collect()),
        }
    }

    pub async fn insert(&self, account: Account) {
        self.accounts.write().await.insert(account.name.clone(), account);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn lookup(&self, name: &str) -> Result<Account, AccountError> {
        self.accounts
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AccountError::NotFound(name.to_string()))
    }

    async fn count(&self) -> usize {
        self.accounts.read().await.len()
    }
}

/// On-disk record; field names match the file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    appid: String,
    secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

impl AccountRecord {
    fn into_account(self, name: &str) -> Account {
        Account {
            name: name.to_string(),
            app_id: self.appid,
            app_secret: self.secret,
            token: self.token.filter(|t| !t.trim().is_empty()),
        }
    }
}

/// JSON-file-backed store. Loaded once; every mutation rewrites the file.
pub struct FileAccountStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, AccountRecord>>,
}

impl FileAccountStore {
    /// Load from `path`. A missing file is an empty store; an unreadable or invalid file is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AccountError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => BTreeMap::new(),
            Ok(s) => serde_json::from_str(&s).map_err(|source| AccountError::Parse {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("account store not found, starting empty: {}", path.display());
                BTreeMap::new()
            }
            Err(source) => {
                return Err(AccountError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> AccountError {
        AccountError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    async fn save(&self, records: &BTreeMap<String, AccountRecord>) -> Result<(), AccountError> {
        let json = serde_json::to_string_pretty(records).map_err(|source| AccountError::Parse {
            path: self.path.display().to_string(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| self.io_err(e))
    }

    /// Insert or replace the account under its name and persist.
    pub async fn bind(&self, account: Account) -> Result<(), AccountError> {
        let mut records = self.records.write().await;
        records.insert(
            account.name,
            AccountRecord {
                appid: account.app_id,
                secret: account.app_secret,
                token: account.token,
            },
        );
        self.save(&records).await
    }

    /// Remove the named account. Returns false when it did not exist.
    pub async fn remove(&self, name: &str) -> Result<bool, AccountError> {
        let mut records = self.records.write().await;
        if records.remove(name).is_none() {
            return Ok(false);
        }
        self.save(&records).await?;
        Ok(true)
    }

    /// All accounts, ordered by name.
    pub async fn list(&self) -> Vec<Account> {
        self.records
            .read()
            .await
            .iter()
            .map(|(name, r)| r.clone().into_account(name))
            .collect()
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn lookup(&self, name: &str) -> Result<Account, AccountError> {
        self.records
            .read()
            .await
            .get(name)
            .cloned()
            .map(|r| r.into_account(name))
            .ok_or_else(|| AccountError::NotFound(name.to_string()))
    }

    async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    async fn is_available(&self) -> bool {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::metadata(dir).await.is_ok()
    }
}
