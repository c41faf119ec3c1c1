//! Webhook gateway HTTP server: ownership challenge (GET) and message delivery (POST).

use crate::accounts::{Account, AccountError, AccountStore, FileAccountStore};
use crate::config::{self, Config, GatewayConfig};
use crate::gateway::audit::{AuditEntry, AuditLog, Outcome};
use crate::wechat::{codec, signature, DecodeError, EncodeError, ReplyPolicy, SignatureError};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long shutdown waits for the audit writer to drain.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters the provider attaches to every webhook call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeQuery {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    /// Only present on the GET ownership challenge.
    #[serde(default)]
    pub echostr: String,
}

/// Request failures. None of them reach the message sender; the provider only sees status and body shape.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("signature rejected: {0}")]
    SignatureInvalid(#[from] SignatureError),
    /// Query string that cannot carry a signature (e.g. repeated parameters).
    #[error("signature rejected: unreadable query: {0}")]
    UnreadableQuery(String),
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("account store failure: {0}")]
    AccountStoreFailure(#[source] AccountError),
    #[error(transparent)]
    MalformedMessage(#[from] DecodeError),
    #[error(transparent)]
    InternalEncodeFailure(#[from] EncodeError),
}

impl GatewayError {
    fn outcome(&self) -> Outcome {
        match self {
            GatewayError::SignatureInvalid(_) | GatewayError::UnreadableQuery(_) => {
                Outcome::SignatureRejected
            }
            GatewayError::UnknownAccount(_) => Outcome::UnknownAccount,
            GatewayError::AccountStoreFailure(_) => Outcome::StoreFailed,
            GatewayError::MalformedMessage(_) => Outcome::Malformed,
            GatewayError::InternalEncodeFailure(_) => Outcome::EncodeFailed,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::SignatureInvalid(_) | GatewayError::UnreadableQuery(_) => {
                StatusCode::FORBIDDEN.into_response()
            }
            GatewayError::UnknownAccount(_) => StatusCode::NOT_FOUND.into_response(),
            GatewayError::AccountStoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            // Acknowledge so the provider does not retry a payload that will never parse.
            GatewayError::MalformedMessage(_) | GatewayError::InternalEncodeFailure(_) => {
                StatusCode::OK.into_response()
            }
        }
    }
}

/// Shared state for the gateway. Read-only per request apart from the audit channel.
#[derive(Clone)]
pub struct GatewayState {
    pub accounts: Arc<dyn AccountStore>,
    pub policy: Arc<ReplyPolicy>,
    pub audit: AuditLog,
    /// Account served on the bare `/wechat` path.
    pub default_account: Option<String>,
    pub port: u16,
}

impl GatewayState {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        policy: ReplyPolicy,
        audit: AuditLog,
        gateway: &GatewayConfig,
    ) -> Self {
        Self {
            accounts,
            policy: Arc::new(policy),
            audit,
            default_account: gateway
                .default_account
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            port: gateway.port,
        }
    }

    fn default_account_name(&self) -> &str {
        self.default_account.as_deref().unwrap_or("")
    }
}

/// Build the router: health at `/` and `/health`, webhook at `/wechat` and `/wechat/:account`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/health", get(health_http))
        .route("/wechat", get(challenge_default).post(delivery_default))
        .route("/wechat/:account", get(challenge_named).post(delivery_named))
        .with_state(state)
}

async fn resolve_account(state: &GatewayState, name: &str) -> Result<Account, GatewayError> {
    match state.accounts.lookup(name).await {
        Ok(account) => Ok(account),
        Err(AccountError::NotFound(_)) => Err(GatewayError::UnknownAccount(name.to_string())),
        Err(e) => Err(GatewayError::AccountStoreFailure(e)),
    }
}

/// Query as extracted by axum; a rejection is kept so it is answered and audited like a bad signature.
fn query_input(
    query: &Result<Query<ChallengeQuery>, QueryRejection>,
) -> Result<&ChallengeQuery, GatewayError> {
    query
        .as_ref()
        .map(|Query(q)| q)
        .map_err(|e| GatewayError::UnreadableQuery(e.body_text()))
}

/// Body as extracted by axum; an unreadable or oversized body goes down the malformed path.
fn body_input(body: &Result<Bytes, BytesRejection>) -> Result<&[u8], GatewayError> {
    body.as_ref()
        .map(|b| &b[..])
        .map_err(|e| DecodeError::Malformed(format!("unreadable body: {}", e.body_text())).into())
}

/// Account segment of the path; one that cannot be decoded names no account.
fn path_account(account: Result<Path<String>, PathRejection>) -> String {
    account.map(|Path(a)| a).unwrap_or_default()
}

fn verify_query(account: &Account, query: &ChallengeQuery) -> Result<(), GatewayError> {
    signature::check(
        account.token_str(),
        &query.timestamp,
        &query.nonce,
        &query.signature,
    )?;
    Ok(())
}

fn audit_name(name: &str) -> &str {
    if name.is_empty() {
        "-"
    } else {
        name
    }
}

/// Ownership challenge: 200 with echostr verbatim when the signature checks out, 403 otherwise.
pub async fn handle_challenge(state: &GatewayState, name: &str, query: &ChallengeQuery) -> Response {
    challenge(state, name, Ok(query)).await
}

async fn challenge(
    state: &GatewayState,
    name: &str,
    query: Result<&ChallengeQuery, GatewayError>,
) -> Response {
    let result = async {
        let account = resolve_account(state, name).await?;
        let query = query?;
        verify_query(&account, query)?;
        Ok::<_, GatewayError>(query.echostr.clone())
    }
    .await;
    match result {
        Ok(echostr) => {
            state.audit.record(AuditEntry::new(
                audit_name(name),
                "challenge",
                "-",
                Outcome::ChallengeOk,
            ));
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                echostr,
            )
                .into_response()
        }
        Err(e) => {
            state.audit.record(
                AuditEntry::new(audit_name(name), "challenge", "-", e.outcome())
                    .with_detail(e.to_string()),
            );
            e.into_response()
        }
    }
}

/// What a delivery got as far as, for the audit entry.
struct Trace {
    kind: &'static str,
    decision: &'static str,
}

async fn deliver(
    state: &GatewayState,
    name: &str,
    query: Result<&ChallengeQuery, GatewayError>,
    body: Result<&[u8], GatewayError>,
    trace: &mut Trace,
) -> Result<Vec<u8>, GatewayError> {
    let account = resolve_account(state, name).await?;
    verify_query(&account, query?)?;
    let envelope = codec::decode(body?)?;
    trace.kind = envelope.message.kind();
    let (decision, reply) = state.policy.decide(&envelope, chrono::Local::now());
    trace.decision = decision.as_str();
    Ok(codec::encode(&reply)?)
}

/// Message delivery: re-verify, decode, decide, encode. Everything past the signature check answers 200.
pub async fn handle_delivery(
    state: &GatewayState,
    name: &str,
    query: &ChallengeQuery,
    body: &[u8],
) -> Response {
    delivery(state, name, Ok(query), Ok(body)).await
}

async fn delivery(
    state: &GatewayState,
    name: &str,
    query: Result<&ChallengeQuery, GatewayError>,
    body: Result<&[u8], GatewayError>,
) -> Response {
    let mut trace = Trace {
        kind: "unknown",
        decision: "-",
    };
    let result = deliver(state, name, query, body, &mut trace).await;
    let name = audit_name(name);
    match result {
        Ok(bytes) if bytes.is_empty() => {
            state.audit.record(AuditEntry::new(
                name,
                trace.kind,
                trace.decision,
                Outcome::NoReply,
            ));
            StatusCode::OK.into_response()
        }
        Ok(bytes) => {
            state.audit.record(AuditEntry::new(
                name,
                trace.kind,
                trace.decision,
                Outcome::Replied,
            ));
            ([(header::CONTENT_TYPE, codec::CONTENT_TYPE)], bytes).into_response()
        }
        Err(e) => {
            state.audit.record(
                AuditEntry::new(name, trace.kind, trace.decision, e.outcome())
                    .with_detail(e.to_string()),
            );
            e.into_response()
        }
    }
}

async fn challenge_named(
    State(state): State<GatewayState>,
    account: Result<Path<String>, PathRejection>,
    query: Result<Query<ChallengeQuery>, QueryRejection>,
) -> Response {
    challenge(&state, &path_account(account), query_input(&query)).await
}

async fn challenge_default(
    State(state): State<GatewayState>,
    query: Result<Query<ChallengeQuery>, QueryRejection>,
) -> Response {
    challenge(&state, state.default_account_name(), query_input(&query)).await
}

async fn delivery_named(
    State(state): State<GatewayState>,
    account: Result<Path<String>, PathRejection>,
    query: Result<Query<ChallengeQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let name = path_account(account);
    delivery(&state, &name, query_input(&query), body_input(&body)).await
}

async fn delivery_default(
    State(state): State<GatewayState>,
    query: Result<Query<ChallengeQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    delivery(
        &state,
        state.default_account_name(),
        query_input(&query),
        body_input(&body),
    )
    .await
}

/// GET / and /health: liveness, 200 while the account store is reachable.
async fn health_http(State(state): State<GatewayState>) -> Response {
    if state.accounts.is_available().await {
        Json(json!({
            "status": "ok",
            "accounts": state.accounts.count().await,
            "port": state.port,
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
            .into_response()
    }
}

/// Run the webhook gateway until SIGINT/SIGTERM.
/// Accounts are read from the configured account store; the audit log is appended next to the config.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let accounts_path = config::resolve_accounts_path(&config, &config_path);
    let store = FileAccountStore::load(&accounts_path)
        .await
        .with_context(|| format!("loading accounts from {}", accounts_path.display()))?;
    log::info!(
        "loaded {} account(s) from {}",
        store.count().await,
        accounts_path.display()
    );
    for account in store.list().await {
        if account.token.is_none() {
            log::warn!(
                "account {} has no token; its webhook will reject every request (bind it again with --token)",
                account.name
            );
        }
        if let Some(ref base) = config.gateway.public_url {
            log::info!(
                "callback URL for {}: {}/wechat/{}",
                account.name,
                base.trim_end_matches('/'),
                account.name
            );
        }
    }
    if let Some(ref name) = config.gateway.default_account {
        if store.lookup(name).await.is_err() {
            log::warn!("default account {} is not bound; /wechat will answer 404", name);
        }
    }

    let audit_path = config::resolve_audit_path(&config, &config_path);
    let (audit, audit_task) = AuditLog::to_file(&audit_path).await?;
    log::info!("audit log: {}", audit_path.display());

    let state = GatewayState::new(
        Arc::new(store),
        ReplyPolicy::from_config(&config.replies),
        audit,
        &config.gateway,
    );
    let app = router(state);

    let bind = config.gateway.bind.trim();
    if !config::is_loopback_bind(bind) {
        log::info!(
            "binding to non-loopback address {}; requests are authenticated by per-account signatures only",
            bind
        );
    }
    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, audit_task).await.is_err() {
        log::warn!("audit writer did not finish within {:?}", AUDIT_DRAIN_TIMEOUT);
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}
