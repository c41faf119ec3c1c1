//! Official-account protocol pieces: webhook signature, message codec, reply policy,
//! and the platform API client used for credential checks and draft publishing.

pub mod api;
pub mod codec;
mod message;
pub mod policy;
pub mod signature;

pub use api::{ApiError, DraftArticle, DraftRequest, WeChatClient};
pub use codec::{DecodeError, EncodeError};
pub use message::{EventKind, InboundEnvelope, InboundMessage, OutboundReply, ReplyBody};
pub use policy::{Decision, ReplyPolicy};
pub use signature::SignatureError;
