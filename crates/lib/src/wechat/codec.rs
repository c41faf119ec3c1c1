//! XML codec for the webhook message exchange.
//!
//! Inbound documents are flat `<xml>` trees whose fields vary by `MsgType`; they are
//! decoded into [`InboundEnvelope`]. Replies are rendered in the same grammar with
//! every string value in CDATA.

use crate::wechat::message::{EventKind, InboundEnvelope, InboundMessage, OutboundReply, ReplyBody};
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;

/// Content type for encoded replies.
pub const CONTENT_TYPE: &str = "application/xml";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("writing reply xml: {0}")]
    Xml(String),
}

/// Wire shape: every field optional so that missing fields become decode errors with a reason
/// instead of opaque deserializer failures. Unknown elements are skipped.
#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(rename = "ToUserName")]
    to_user_name: Option<String>,
    #[serde(rename = "FromUserName")]
    from_user_name: Option<String>,
    #[serde(rename = "CreateTime")]
    create_time: Option<String>,
    #[serde(rename = "MsgType")]
    msg_type: Option<String>,
    #[serde(rename = "MsgId")]
    msg_id: Option<String>,
    #[serde(rename = "Content")]
    content: Option<String>,
    #[serde(rename = "MediaId")]
    media_id: Option<String>,
    #[serde(rename = "PicUrl")]
    pic_url: Option<String>,
    /// Reply-shaped image documents nest the media id.
    #[serde(rename = "Image")]
    image: Option<RawMedia>,
    #[serde(rename = "Event")]
    event: Option<String>,
    #[serde(rename = "EventKey")]
    event_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMedia {
    #[serde(rename = "MediaId")]
    media_id: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn required(v: Option<String>, field: &str) -> Result<String, DecodeError> {
    non_empty(v).ok_or_else(|| DecodeError::Malformed(format!("missing {}", field)))
}

/// Parse a raw POST body into an envelope.
pub fn decode(raw: &[u8]) -> Result<InboundEnvelope, DecodeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| DecodeError::Malformed("body is not valid UTF-8".to_string()))?;
    let msg: RawMessage =
        quick_xml::de::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let to_account = required(msg.to_user_name, "ToUserName")?;
    let from_user = required(msg.from_user_name, "FromUserName")?;
    let create_time = required(msg.create_time, "CreateTime")?;
    let created_at: i64 = create_time
        .parse()
        .map_err(|_| DecodeError::Malformed(format!("CreateTime is not an integer: {:?}", create_time)))?;
    let msg_type = required(msg.msg_type, "MsgType")?.to_ascii_lowercase();

    let message = match msg_type.as_str() {
        "text" => InboundMessage::Text {
            // Content is kept verbatim (no trim) so replies and logs see what the user sent.
            content: msg.content.unwrap_or_default(),
        },
        "image" => {
            let media_id = non_empty(msg.media_id)
                .or_else(|| msg.image.and_then(|i| non_empty(i.media_id)))
                .unwrap_or_default();
            InboundMessage::Image {
                media_id,
                pic_url: non_empty(msg.pic_url).unwrap_or_default(),
            }
        }
        "event" => InboundMessage::Event {
            event: EventKind::parse(&required(msg.event, "Event")?),
            key: non_empty(msg.event_key),
        },
        other => {
            return Err(DecodeError::Malformed(format!("unsupported MsgType: {:?}", other)));
        }
    };

    Ok(InboundEnvelope {
        to_account,
        from_user,
        created_at,
        msg_id: non_empty(msg.msg_id),
        message,
    })
}

fn xml_err(e: impl std::fmt::Display) -> EncodeError {
    EncodeError::Xml(e.to_string())
}

/// Write `value` as CDATA, splitting around any `]]>` so the section never terminates early.
fn write_cdata<W: std::io::Write>(w: &mut Writer<W>, value: &str) -> Result<(), EncodeError> {
    let mut rest = value;
    while let Some(i) = rest.find("]]>") {
        w.write_event(Event::CData(BytesCData::new(&rest[..i + 2])))
            .map_err(xml_err)?;
        rest = &rest[i + 2..];
    }
    w.write_event(Event::CData(BytesCData::new(rest)))
        .map_err(xml_err)
}

fn write_cdata_element<W: std::io::Write>(
    w: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), EncodeError> {
    w.write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    write_cdata(w, value)?;
    w.write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)
}

/// Render a reply. `ReplyBody::Empty` renders as zero bytes.
pub fn encode(reply: &OutboundReply) -> Result<Vec<u8>, EncodeError> {
    if reply.is_empty() {
        return Ok(Vec::new());
    }
    let mut w = Writer::new(Vec::new());
    w.write_event(Event::Start(BytesStart::new("xml")))
        .map_err(xml_err)?;
    write_cdata_element(&mut w, "ToUserName", &reply.to_user)?;
    write_cdata_element(&mut w, "FromUserName", &reply.from_account)?;
    w.write_event(Event::Start(BytesStart::new("CreateTime")))
        .map_err(xml_err)?;
    w.write_event(Event::Text(BytesText::new(&reply.created_at.to_string())))
        .map_err(xml_err)?;
    w.write_event(Event::End(BytesEnd::new("CreateTime")))
        .map_err(xml_err)?;
    write_cdata_element(&mut w, "MsgType", reply.kind())?;
    match &reply.body {
        ReplyBody::Text(content) => write_cdata_element(&mut w, "Content", content)?,
        ReplyBody::Image { media_id } => {
            w.write_event(Event::Start(BytesStart::new("Image")))
                .map_err(xml_err)?;
            write_cdata_element(&mut w, "MediaId", media_id)?;
            w.write_event(Event::End(BytesEnd::new("Image")))
                .map_err(xml_err)?;
        }
        ReplyBody::Empty => {}
    }
    w.write_event(Event::End(BytesEnd::new("xml")))
        .map_err(xml_err)?;
    Ok(w.into_inner())
}
