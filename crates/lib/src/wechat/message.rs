//! Typed inbound envelope and outbound reply for the webhook message exchange.

/// One inbound message delivered by the provider, parsed from the wire document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    /// Official account the message was sent to (`ToUserName`).
    pub to_account: String,
    /// Sender's open id (`FromUserName`).
    pub from_user: String,
    /// Unix seconds (`CreateTime`).
    pub created_at: i64,
    /// Provider message id; absent on events.
    pub msg_id: Option<String>,
    pub message: InboundMessage,
}

/// Kind-specific payload of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text { content: String },
    Image { media_id: String, pic_url: String },
    Event { event: EventKind, key: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Subscribe,
    Unsubscribe,
    Other(String),
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.eq_ignore_ascii_case("subscribe") {
            EventKind::Subscribe
        } else if s.eq_ignore_ascii_case("unsubscribe") {
            EventKind::Unsubscribe
        } else {
            EventKind::Other(s.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Other(s) => s,
        }
    }
}

impl InboundMessage {
    /// Wire `MsgType` value.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Text { .. } => "text",
            InboundMessage::Image { .. } => "image",
            InboundMessage::Event { .. } => "event",
        }
    }
}

/// Reply produced for one envelope. `Empty` means "acknowledged, no body".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub to_user: String,
    pub from_account: String,
    pub created_at: i64,
    pub body: ReplyBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Text(String),
    Image { media_id: String },
    Empty,
}

impl OutboundReply {
    /// Reply addressed back to the sender of `envelope`, from the receiving account.
    pub fn to(envelope: &InboundEnvelope, created_at: i64, body: ReplyBody) -> Self {
        Self {
            to_user: envelope.from_user.clone(),
            from_account: envelope.to_account.clone(),
            created_at,
            body,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.body, ReplyBody::Empty)
    }

    /// Wire `MsgType` of the reply, or "empty".
    pub fn kind(&self) -> &'static str {
        match self.body {
            ReplyBody::Text(_) => "text",
            ReplyBody::Image { .. } => "image",
            ReplyBody::Empty => "empty",
        }
    }
}
