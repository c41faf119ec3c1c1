//! Reply policy: maps an inbound envelope to the reply the gateway sends back.
//!
//! Pure: the only inputs are the envelope, the configured texts and the clock value
//! passed by the caller. No I/O, no allocation beyond the reply itself.

use crate::config::RepliesConfig;
use crate::wechat::message::{EventKind, InboundEnvelope, InboundMessage, OutboundReply, ReplyBody};
use chrono::{DateTime, Local};

/// Text longer than this (bytes) is never matched against keywords.
pub const MAX_TEXT_BYTES: usize = 2048;

const DEFAULT_WELCOME: &str = "欢迎关注！🎉\n\n这里是公众号助手，可以帮你管理公众号配置、发布文章到草稿箱。\n\n发送\"帮助\"了解更多功能吧～";
const DEFAULT_GREETING: &str = "嘿嘿~ 你好呀！我是公众号助手～ (´∀｀) 💖";
const DEFAULT_HELP: &str = "🎮 基础功能：\n• 发送\"你好\"来打招呼～\n• 发送\"时间\"看现在几点啦\n• 发张图片给我试试看！";
const DEFAULT_IMAGE_ACK: &str = "哇~ 收到一张图片呢！✨ 图片很棒哦～ (´∀｀) 🎨";

const GREETING_KEYWORDS: &[&str] = &["你好", "hello"];
const HELP_KEYWORDS: &[&str] = &["帮助", "help"];
const TIME_KEYWORDS: &[&str] = &["时间", "time"];

/// Decision label recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Welcome,
    Greeting,
    Help,
    Time,
    ImageAck,
    NoReply,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Welcome => "welcome",
            Decision::Greeting => "greeting",
            Decision::Help => "help",
            Decision::Time => "time",
            Decision::ImageAck => "image_ack",
            Decision::NoReply => "no_reply",
        }
    }
}

/// Reply texts; built-in defaults unless overridden by config.
#[derive(Debug, Clone)]
pub struct ReplyPolicy {
    welcome: String,
    greeting: String,
    help: String,
    image_ack: String,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self::from_config(&RepliesConfig::default())
    }
}

fn pick(configured: Option<&String>, default: &str) -> String {
    configured
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

impl ReplyPolicy {
    pub fn from_config(replies: &RepliesConfig) -> Self {
        Self {
            welcome: pick(replies.welcome.as_ref(), DEFAULT_WELCOME),
            greeting: pick(replies.greeting.as_ref(), DEFAULT_GREETING),
            help: pick(replies.help.as_ref(), DEFAULT_HELP),
            image_ack: pick(replies.image_ack.as_ref(), DEFAULT_IMAGE_ACK),
        }
    }

    /// Classify the envelope. First match wins; text keywords are matched case-insensitively.
    pub fn classify(&self, envelope: &InboundEnvelope) -> Decision {
        match &envelope.message {
            InboundMessage::Event {
                event: EventKind::Subscribe,
                ..
            } => Decision::Welcome,
            InboundMessage::Event { .. } => Decision::NoReply,
            InboundMessage::Text { content } => {
                let text = content.trim();
                if text.is_empty() || text.len() > MAX_TEXT_BYTES {
                    return Decision::NoReply;
                }
                let lower = text.to_lowercase();
                if contains_any(&lower, GREETING_KEYWORDS) {
                    Decision::Greeting
                } else if contains_any(&lower, HELP_KEYWORDS) {
                    Decision::Help
                } else if contains_any(&lower, TIME_KEYWORDS) {
                    Decision::Time
                } else {
                    Decision::NoReply
                }
            }
            InboundMessage::Image { .. } => Decision::ImageAck,
        }
    }

    /// Build the reply for `envelope` as of `now`.
    pub fn decide(&self, envelope: &InboundEnvelope, now: DateTime<Local>) -> (Decision, OutboundReply) {
        let decision = self.classify(envelope);
        let body = match decision {
            Decision::Welcome => ReplyBody::Text(self.welcome.clone()),
            Decision::Greeting => ReplyBody::Text(self.greeting.clone()),
            Decision::Help => ReplyBody::Text(self.help.clone()),
            Decision::Time => ReplyBody::Text(format!(
                "当前时间是: {} 呀～ \\(^o^)/",
                now.format("%Y-%m-%d %H:%M:%S")
            )),
            Decision::ImageAck => ReplyBody::Text(self.image_ack.clone()),
            Decision::NoReply => ReplyBody::Empty,
        };
        (decision, OutboundReply::to(envelope, now.timestamp(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn envelope(message: InboundMessage) -> InboundEnvelope {
        InboundEnvelope {
            to_account: "gh_account".to_string(),
            from_user: "o_user".to_string(),
            created_at: 1_700_000_000,
            msg_id: None,
            message,
        }
    }

    fn text(s: &str) -> InboundEnvelope {
        envelope(InboundMessage::Text {
            content: s.to_string(),
        })
    }

    fn now() -> DateTime<Local> {
        Local.timestamp_opt(1_700_000_100, 0).unwrap()
    }

    #[test]
    fn subscribe_gets_welcome() {
        let policy = ReplyPolicy::default();
        let env = envelope(InboundMessage::Event {
            event: EventKind::Subscribe,
            key: None,
        });
        let (decision, reply) = policy.decide(&env, now());
        assert_eq!(decision, Decision::Welcome);
        assert_eq!(reply.body, ReplyBody::Text(DEFAULT_WELCOME.to_string()));
        assert_eq!(reply.to_user, "o_user");
        assert_eq!(reply.from_account, "gh_account");
        assert_eq!(reply.created_at, 1_700_000_100);
    }

    #[test]
    fn unsubscribe_and_other_events_get_nothing() {
        let policy = ReplyPolicy::default();
        for event in [EventKind::Unsubscribe, EventKind::Other("CLICK".to_string())] {
            let env = envelope(InboundMessage::Event { event, key: None });
            assert!(policy.decide(&env, now()).1.is_empty());
        }
    }

    #[test]
    fn keywords_match_case_insensitively_in_order() {
        let policy = ReplyPolicy::default();
        assert_eq!(policy.classify(&text("你好")), Decision::Greeting);
        assert_eq!(policy.classify(&text("HeLLo there")), Decision::Greeting);
        assert_eq!(policy.classify(&text("帮助")), Decision::Help);
        assert_eq!(policy.classify(&text("HELP")), Decision::Help);
        assert_eq!(policy.classify(&text("what TIME is it")), Decision::Time);
        // greeting wins over help when both appear
        assert_eq!(policy.classify(&text("hello, help me")), Decision::Greeting);
        assert_eq!(policy.classify(&text("random chatter")), Decision::NoReply);
    }

    #[test]
    fn time_reply_uses_supplied_clock() {
        let policy = ReplyPolicy::default();
        let (_, reply) = policy.decide(&text("时间"), now());
        let expected = now().format("%Y-%m-%d %H:%M:%S").to_string();
        match reply.body {
            ReplyBody::Text(s) => assert!(s.contains(&expected), "{}", s),
            other => panic!("expected text reply, got {:?}", other),
        }
    }

    #[test]
    fn image_gets_acknowledgment() {
        let policy = ReplyPolicy::default();
        let env = envelope(InboundMessage::Image {
            media_id: "m".to_string(),
            pic_url: String::new(),
        });
        let (decision, reply) = policy.decide(&env, now());
        assert_eq!(decision, Decision::ImageAck);
        assert_eq!(reply.body, ReplyBody::Text(DEFAULT_IMAGE_ACK.to_string()));
    }

    #[test]
    fn empty_and_oversized_text_get_nothing() {
        let policy = ReplyPolicy::default();
        assert!(policy.decide(&text(""), now()).1.is_empty());
        assert!(policy.decide(&text("   "), now()).1.is_empty());
        let long = format!("hello {}", "x".repeat(MAX_TEXT_BYTES));
        assert!(policy.decide(&text(&long), now()).1.is_empty());
    }

    #[test]
    fn identical_envelopes_give_identical_replies() {
        let policy = ReplyPolicy::default();
        let env = text("你好");
        assert_eq!(policy.decide(&env, now()), policy.decide(&env.clone(), now()));
    }

    #[test]
    fn configured_texts_override_defaults() {
        let replies = RepliesConfig {
            greeting: Some("hi from config".to_string()),
            welcome: Some("   ".to_string()),
            ..Default::default()
        };
        let policy = ReplyPolicy::from_config(&replies);
        let (_, reply) = policy.decide(&text("hello"), now());
        assert_eq!(reply.body, ReplyBody::Text("hi from config".to_string()));
        // blank override falls back to the built-in text
        let sub = envelope(InboundMessage::Event {
            event: EventKind::Subscribe,
            key: None,
        });
        assert_eq!(
            policy.decide(&sub, now()).1.body,
            ReplyBody::Text(DEFAULT_WELCOME.to_string())
        );
    }
}
