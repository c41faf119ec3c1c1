//! Append-only audit log: one JSON line per processed webhook request.
//!
//! Handlers push entries into an unbounded channel; a single writer task owns the file.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Final outcome of one request, as seen by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// GET challenge answered with echostr.
    ChallengeOk,
    /// Bad signature on GET or POST (403).
    SignatureRejected,
    /// No such account (404).
    UnknownAccount,
    /// Account store could not be read (500).
    StoreFailed,
    /// Body could not be decoded; acknowledged with an empty 200.
    Malformed,
    /// Reply document sent.
    Replied,
    /// Acknowledged with an empty 200, nothing to say.
    NoReply,
    /// Reply could not be encoded; acknowledged with an empty 200.
    EncodeFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::ChallengeOk => "challenge_ok",
            Outcome::SignatureRejected => "signature_rejected",
            Outcome::UnknownAccount => "unknown_account",
            Outcome::StoreFailed => "store_failed",
            Outcome::Malformed => "malformed",
            Outcome::Replied => "replied",
            Outcome::NoReply => "no_reply",
            Outcome::EncodeFailed => "encode_failed",
        }
    }

    /// Level the entry is mirrored to `log` at: warn for security and malformed input, error for our own failures.
    pub fn level(self) -> log::Level {
        match self {
            Outcome::SignatureRejected | Outcome::Malformed | Outcome::UnknownAccount => {
                log::Level::Warn
            }
            Outcome::EncodeFailed | Outcome::StoreFailed => log::Level::Error,
            Outcome::ChallengeOk | Outcome::Replied | Outcome::NoReply => log::Level::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    /// RFC 3339, local time.
    pub timestamp: String,
    pub account: String,
    /// "challenge", or the inbound MsgType ("text", "image", "event", "unknown").
    pub remote_kind: String,
    /// Reply policy decision, or "-" when the request never reached the policy.
    pub decision: String,
    pub outcome: Outcome,
    /// Rejection or failure reason, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(account: &str, remote_kind: &str, decision: &str, outcome: Outcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            account: account.to_string(),
            remote_kind: remote_kind.to_string(),
            decision: decision.to_string(),
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Cloneable handle for appending audit entries.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditEntry>,
}

impl AuditLog {
    /// Handle plus the receiving end; the caller consumes entries.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Append entries as JSON lines to `path`. The writer task ends once every handle is dropped.
    pub async fn to_file(path: &Path) -> Result<(Self, JoinHandle<()>)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating audit log directory {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening audit log {}", path.display()))?;
        let (sink, mut rx) = Self::channel();
        let display = path.display().to_string();
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let mut line = match serde_json::to_string(&entry) {
                    Ok(l) => l,
                    Err(e) => {
                        log::error!("audit entry not serializable: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    log::error!("writing audit log {}: {}", display, e);
                    continue;
                }
                if let Err(e) = file.flush().await {
                    log::error!("flushing audit log {}: {}", display, e);
                }
            }
            log::debug!("audit writer for {} stopped", display);
        });
        Ok((sink, handle))
    }

    /// Record one entry: mirrored to the `log` facade, then queued for the sink.
    pub fn record(&self, entry: AuditEntry) {
        log::log!(
            target: "wxoa::audit",
            entry.outcome.level(),
            "account={} kind={} decision={} outcome={}{}",
            entry.account,
            entry.remote_kind,
            entry.decision,
            entry.outcome.as_str(),
            entry
                .detail
                .as_deref()
                .map(|d| format!(" detail={:?}", d))
                .unwrap_or_default()
        );
        if self.tx.send(entry).is_err() {
            log::debug!("audit sink closed, entry dropped");
        }
    }
}
