//! Router-level webhook tests: requests go through the real axum router via `oneshot`,
//! with an in-memory account store and a channel audit sink. No network, no filesystem.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;
use wxoa::accounts::{Account, MemoryAccountStore};
use wxoa::config::GatewayConfig;
use wxoa::gateway::{router, AuditEntry, AuditLog, GatewayState, Outcome};
use wxoa::wechat::{codec, signature, InboundMessage, ReplyPolicy};

const TOKEN: &str = "suplin123123";

fn app(default_account: Option<&str>) -> (Router, UnboundedReceiver<AuditEntry>) {
    let store = MemoryAccountStore::new([
        Account {
            name: "gallery".to_string(),
            app_id: "wx_gallery".to_string(),
            app_secret: "0123456789abcdef".to_string(),
            token: Some(TOKEN.to_string()),
        },
        Account {
            name: "tokenless".to_string(),
            app_id: "wx_tokenless".to_string(),
            app_secret: "0123456789abcdef".to_string(),
            token: None,
        },
    ]);
    let (audit, rx) = AuditLog::channel();
    let gateway = GatewayConfig {
        default_account: default_account.map(str::to_string),
        ..GatewayConfig::default()
    };
    let state = GatewayState::new(Arc::new(store), ReplyPolicy::default(), audit, &gateway);
    (router(state), rx)
}

fn query(token: &str, timestamp: &str, nonce: &str, echostr: Option<&str>) -> String {
    let sig = signature::sign(token, timestamp, nonce);
    let mut q = format!("signature={}&timestamp={}&nonce={}", sig, timestamp, nonce);
    if let Some(e) = echostr {
        q.push_str("&echostr=");
        q.push_str(e);
    }
    q
}

fn text_message(content: &str) -> String {
    format!(
        "<xml><ToUserName><![CDATA[gh_account]]></ToUserName>\
         <FromUserName><![CDATA[o_user]]></FromUserName>\
         <CreateTime>1700000000</CreateTime>\
         <MsgType><![CDATA[text]]></MsgType>\
         <Content><![CDATA[{}]]></Content>\
         <MsgId>1234567890</MsgId></xml>",
        content
    )
}

fn message_of_type(msg_type: &str, extra: &str) -> String {
    format!(
        "<xml><ToUserName><![CDATA[gh_account]]></ToUserName>\
         <FromUserName><![CDATA[o_user]]></FromUserName>\
         <CreateTime>1700000000</CreateTime>\
         <MsgType><![CDATA[{}]]></MsgType>{}</xml>",
        msg_type, extra
    )
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let res = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, Option<String>, Vec<u8>) {
    let res = app
        .clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "text/xml")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = res.status();
    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, content_type, body.to_vec())
}

fn drain(rx: &mut UnboundedReceiver<AuditEntry>) -> Vec<AuditEntry> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}

#[tokio::test]
async fn challenge_with_valid_signature_echoes() {
    let (app, mut rx) = app(None);
    let uri = format!(
        "/wechat/gallery?{}",
        query(TOKEN, "1700000000", "abc", Some("hello123"))
    );
    let (status, body) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello123");
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, Outcome::ChallengeOk);
    assert_eq!(entries[0].account, "gallery");
}

#[tokio::test]
async fn challenge_with_flipped_signature_is_forbidden() {
    let (app, mut rx) = app(None);
    let mut sig = signature::sign(TOKEN, "1700000000", "abc");
    let first = if sig.starts_with('0') { "1" } else { "0" };
    sig.replace_range(0..1, first);
    let uri = format!(
        "/wechat/gallery?signature={}&timestamp=1700000000&nonce=abc&echostr=hello123",
        sig
    );
    let (status, body) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());
    assert_eq!(drain(&mut rx)[0].outcome, Outcome::SignatureRejected);
}

#[tokio::test]
async fn challenge_without_parameters_is_forbidden() {
    let (app, _rx) = app(None);
    let (status, body) = get(&app, "/wechat/gallery").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());
}

#[tokio::test]
async fn account_without_token_rejects_everything() {
    let (app, _rx) = app(None);
    let uri = format!(
        "/wechat/tokenless?{}",
        query("", "1700000000", "abc", Some("x"))
    );
    assert_eq!(get(&app, &uri).await.0, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let (app, mut rx) = app(None);
    let uri = format!(
        "/wechat/nobody?{}",
        query(TOKEN, "1700000000", "abc", Some("x"))
    );
    assert_eq!(get(&app, &uri).await.0, StatusCode::NOT_FOUND);
    let (status, _, body) = post(&app, &uri, text_message("你好")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.outcome == Outcome::UnknownAccount));
}

#[tokio::test]
async fn text_greeting_reply_swaps_addresses() {
    let (app, mut rx) = app(None);
    let uri = format!("/wechat/gallery?{}", query(TOKEN, "1700000000", "abc", None));
    let (status, content_type, body) = post(&app, &uri, text_message("你好")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some(codec::CONTENT_TYPE));

    let reply = codec::decode(&body).unwrap();
    assert_eq!(reply.to_account, "o_user");
    assert_eq!(reply.from_user, "gh_account");
    match reply.message {
        InboundMessage::Text { content } => assert!(content.contains("你好"), "{}", content),
        other => panic!("expected text reply, got {:?}", other),
    }
    let xml = String::from_utf8(body).unwrap();
    assert!(xml.contains("<MsgType><![CDATA[text]]></MsgType>"));

    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].remote_kind, "text");
    assert_eq!(entries[0].decision, "greeting");
    assert_eq!(entries[0].outcome, Outcome::Replied);
}

#[tokio::test]
async fn subscribe_event_gets_welcome() {
    let (app, _rx) = app(None);
    let uri = format!("/wechat/gallery?{}", query(TOKEN, "1700000000", "abc", None));
    let body = message_of_type(
        "event",
        "<Event><![CDATA[subscribe]]></Event><EventKey><![CDATA[]]></EventKey>",
    );
    let (status, _, body) = post(&app, &uri, body).await;
    assert_eq!(status, StatusCode::OK);
    match codec::decode(&body).unwrap().message {
        InboundMessage::Text { content } => assert!(content.contains("欢迎关注"), "{}", content),
        other => panic!("expected text reply, got {:?}", other),
    }
}

#[tokio::test]
async fn image_gets_acknowledgment() {
    let (app, _rx) = app(None);
    let uri = format!("/wechat/gallery?{}", query(TOKEN, "1700000000", "abc", None));
    let body = message_of_type(
        "image",
        "<PicUrl><![CDATA[http://mmbiz.example/p]]></PicUrl><MediaId><![CDATA[m1]]></MediaId><MsgId>9</MsgId>",
    );
    let (status, _, body) = post(&app, &uri, body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(matches!(
        codec::decode(&body).unwrap().message,
        InboundMessage::Text { .. }
    ));
}

#[tokio::test]
async fn unknown_message_type_is_acknowledged_empty() {
    let (app, mut rx) = app(None);
    let uri = format!("/wechat/gallery?{}", query(TOKEN, "1700000000", "abc", None));
    let (status, _, body) = post(&app, &uri, message_of_type("unknown_future_type", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, Outcome::Malformed);
    assert!(entries[0].detail.as_deref().unwrap_or("").contains("unknown_future_type"));
    assert_eq!(entries[0].outcome.level(), log::Level::Warn);
}

#[tokio::test]
async fn delivery_with_bad_signature_is_forbidden() {
    let (app, mut rx) = app(None);
    let uri = format!(
        "/wechat/gallery?{}",
        query("wrong-token", "1700000000", "abc", None)
    );
    let (status, _, body) = post(&app, &uri, text_message("你好")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());
    assert_eq!(drain(&mut rx)[0].outcome, Outcome::SignatureRejected);
}

#[tokio::test]
async fn boundary_texts_get_empty_replies() {
    let (app, mut rx) = app(None);
    let uri = format!("/wechat/gallery?{}", query(TOKEN, "1700000000", "abc", None));
    let long = format!("hello {}", "x".repeat(4096));
    for content in ["", "just chatting", long.as_str()] {
        let (status, _, body) = post(&app, &uri, text_message(content)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.outcome == Outcome::NoReply));
}

#[tokio::test]
async fn redelivery_with_fresh_signature_gives_same_reply() {
    let (app, _rx) = app(None);
    let first = format!("/wechat/gallery?{}", query(TOKEN, "1700000000", "abc", None));
    let second = format!("/wechat/gallery?{}", query(TOKEN, "1700000042", "xyz", None));
    let (_, _, a) = post(&app, &first, text_message("help")).await;
    let (_, _, b) = post(&app, &second, text_message("help")).await;
    let a = codec::decode(&a).unwrap();
    let b = codec::decode(&b).unwrap();
    assert_eq!(a.message, b.message);
    assert_eq!(a.to_account, b.to_account);
    assert_eq!(a.from_user, b.from_user);
}

#[tokio::test]
async fn bare_path_uses_default_account() {
    let (with_default, _rx) = app(Some("gallery"));
    let (without_default, _rx2) = app(None);
    let uri = format!("/wechat?{}", query(TOKEN, "1700000000", "abc", Some("ok")));
    let (status, body) = get(&with_default, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
    assert_eq!(get(&without_default, &uri).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_accounts() {
    let (app, _rx) = app(None);
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["accounts"], 2);
}

#[tokio::test]
async fn repeated_signature_parameter_is_forbidden_and_audited() {
    let (app, mut rx) = app(None);
    let uri = format!(
        "/wechat/gallery?signature=a&{}",
        query(TOKEN, "1700000000", "abc", Some("hello123"))
    );
    let (status, body) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.is_empty());
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, Outcome::SignatureRejected);
    assert_eq!(entries[0].remote_kind, "challenge");
    assert!(entries[0].detail.is_some());
}

#[tokio::test]
async fn unreadable_query_for_unknown_account_is_not_found() {
    let (app, mut rx) = app(None);
    let (status, _, _) = post(
        &app,
        "/wechat/nobody?signature=a&signature=b",
        text_message("hello"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, Outcome::UnknownAccount);
    assert_eq!(entries[0].account, "nobody");
}

#[tokio::test]
async fn oversized_body_with_bad_signature_is_forbidden() {
    let (app, mut rx) = app(None);
    let uri = format!(
        "/wechat/gallery?{}",
        query("wrong-token", "1700000000", "abc", None)
    );
    let (status, _, _) = post(&app, &uri, "x".repeat(3 * 1024 * 1024)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, Outcome::SignatureRejected);
}

#[tokio::test]
async fn oversized_body_with_valid_signature_is_acknowledged_empty() {
    let (app, mut rx) = app(None);
    let uri = format!("/wechat/gallery?{}", query(TOKEN, "1700000000", "abc", None));
    let (status, _, body) = post(&app, &uri, "x".repeat(3 * 1024 * 1024)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    let entries = drain(&mut rx);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, Outcome::Malformed);
    assert!(entries[0].detail.as_deref().unwrap().contains("unreadable body"));
}
